// Executor test module
#[cfg(test)]
mod executor_tests;
