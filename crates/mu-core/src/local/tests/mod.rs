#[cfg(test)]
mod provisioning_tests;
#[cfg(test)]
mod services_tests;
