// Stack test module
#[cfg(test)]
mod manager_tests;
#[cfg(test)]
mod stack_tests;
