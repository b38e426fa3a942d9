#[cfg(test)]
mod resources_tests;
