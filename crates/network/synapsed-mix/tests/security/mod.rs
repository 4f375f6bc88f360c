mod replay_tests;
mod tamper_tests;
