mod api;
mod app;
mod commands;
mod redact;
mod session;
mod settings;
mod state;
mod token;
pub mod types;

pub fn run() -> std::process::ExitCode {
    app::run()
}
