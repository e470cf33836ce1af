mod conversation_tests;
mod state_tests;
