use lingo_checkpoint::StoreConfig;
use lingo_graph::{build_tutor_workflow, BuildOptions, ConversationState, Role, RunConfig};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn every_turn_adds_one_checkpoint_and_one_reply(
        messages in prop::collection::vec("[a-zA-Z ?!']{1,40}", 1..8),
    ) {
        let workflow = build_tutor_workflow(
            BuildOptions { testing: true, require_async: false },
            &StoreConfig::default(),
        ).unwrap();
        let run = RunConfig::new("prop");

        for (turn, message) in messages.iter().enumerate() {
            let state = workflow
                .invoke(ConversationState::from_user(message.as_str()), &run)
                .unwrap();
            prop_assert_eq!(state.messages.len(), 2 * (turn + 1));
            prop_assert_eq!(&state.messages[2 * turn].content, message);
            prop_assert_eq!(state.messages[2 * turn + 1].role, Role::Assistant);
            prop_assert!(state.intent.is_some());
        }

        let history = workflow.history(&run).unwrap();
        prop_assert_eq!(history.len(), messages.len());
        for pair in history.windows(2) {
            prop_assert_eq!(pair[1].parent_id, Some(pair[0].checkpoint_id));
        }
    }
}
