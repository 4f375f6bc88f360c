mod config_tests;
mod pipeline_tests;
mod round_trip_tests;
