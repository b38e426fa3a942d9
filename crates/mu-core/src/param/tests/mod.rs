// Parameter manager test module
#[cfg(test)]
mod param_tests;
