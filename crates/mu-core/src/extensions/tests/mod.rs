#[cfg(test)]
mod merge_tests;
