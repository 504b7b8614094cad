//! One-time `env_logger` initialization for the `cli` binary (SPEC_FULL
//! §4.K), mirroring the teacher crate's `env_logger::init()` call in its
//! own binary entry points.

#[cfg(feature = "cli")]
pub fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}
