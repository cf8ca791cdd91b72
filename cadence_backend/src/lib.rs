pub mod agent;
pub mod config;
pub mod generator;
pub mod http_client;
pub mod llm_client;
pub mod outcomes;
pub mod platform;
pub mod runtime;

#[cfg(test)]
pub(crate) mod test_support;
