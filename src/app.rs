use crate::commands;
use crate::session::SessionManager;
use crate::settings::{self, default_settings_path, SettingsStore, TokenStoreKind, KNOWN_KEYS};
use crate::state::{AppState, ClientOverrides};
use crate::types::{IpcErrorCode, IpcResult, LoginPayload, RegisterPayload};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "zoppli", version, about = "Zoppli food-ordering client")]
struct Cli {
    /// Settings file (defaults to the user config directory)
    #[arg(long, global = true, env = "ZOPPLI_SETTINGS")]
    settings: Option<PathBuf>,

    /// Backend base URL, overriding the stored setting
    #[arg(long, global = true, env = "ZOPPLI_API_BASE_URL")]
    api_base_url: Option<String>,

    /// Where credentials are kept
    #[arg(long, global = true, value_enum, env = "ZOPPLI_TOKEN_STORE")]
    token_store: Option<TokenStoreKind>,

    /// Session file used by the file token store
    #[arg(long, global = true, env = "ZOPPLI_SESSION_FILE")]
    session_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check the stored session and report whether to land on login or browse
    Start,
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "ZOPPLI_PASSWORD", hide_env_values = true)]
        password: String,
    },
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long, default_value = "")]
        phone: String,
        #[arg(long, env = "ZOPPLI_PASSWORD", hide_env_values = true)]
        password: String,
    },
    Logout,
    /// Print a valid access token, refreshing it if needed
    Token,
    /// Force a refresh of the access token
    Refresh,
    Me,
    Restaurants {
        #[arg(long)]
        page: Option<u32>,
    },
    Restaurant {
        id: String,
    },
    /// Ask the backend to email a one-time reset code
    ResetRequest {
        #[arg(long)]
        email: String,
    },
    ResetPassword {
        #[arg(long)]
        otp: String,
        #[arg(long)]
        new_password: String,
        #[arg(long)]
        confirm: String,
    },
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    Show,
    Set { key: String, value: String },
    Unset { key: String },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn emit<T: Serialize>(result: IpcResult<T>) -> ExitCode {
    let code = if result.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    };
    match serde_json::to_string_pretty(&result) {
        Ok(out) => println!("{out}"),
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize result");
            return ExitCode::FAILURE;
        }
    }
    code
}

fn parse_setting(key: &str, raw: &str) -> Result<Value, String> {
    if !KNOWN_KEYS.contains(&key) {
        return Err(format!(
            "Unknown setting '{key}'. Known settings: {}",
            KNOWN_KEYS.join(", ")
        ));
    }
    match key {
        settings::KEY_API_BASE_URL => {
            let url = raw.trim().trim_end_matches('/');
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err("apiBaseUrl must start with http:// or https://".to_string());
            }
            Ok(Value::from(url))
        }
        settings::KEY_TOKEN_STORE => match raw.trim().to_ascii_lowercase().as_str() {
            v @ ("file" | "keyring" | "memory") => Ok(Value::from(v)),
            _ => Err("tokenStore must be one of: file, keyring, memory".to_string()),
        },
        _ => raw
            .trim()
            .parse::<u64>()
            .map(Value::from)
            .map_err(|_| format!("{key} must be a whole number")),
    }
}

fn run_config(settings: &SettingsStore, action: ConfigAction) -> ExitCode {
    let result = match action {
        ConfigAction::Show => Ok(()),
        ConfigAction::Set { key, value } => parse_setting(&key, &value)
            .map_err(|msg| (IpcErrorCode::Validation, msg))
            .and_then(|v| {
                settings
                    .set(&key, v)
                    .map_err(|e| (IpcErrorCode::Storage, e.to_string()))
            }),
        ConfigAction::Unset { key } => settings
            .remove(&key)
            .map_err(|e| (IpcErrorCode::Storage, e.to_string())),
    };
    match result {
        Ok(()) => emit(IpcResult::ok(settings.snapshot())),
        Err((code, msg)) => emit(IpcResult::<()>::err(code, msg)),
    }
}

/// Follows session transitions the way a view would, reporting them in the log.
fn follow_session(session: &SessionManager) {
    let mut states = session.subscribe();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let next = *states.borrow_and_update();
            tracing::info!(state = ?next, "session state");
        }
    });
}

async fn dispatch(state: &AppState, command: Command) -> ExitCode {
    match command {
        Command::Start => emit(commands::session_resume(state).await),
        Command::Login { email, password } => {
            emit(commands::auth_login(state, LoginPayload { email, password }).await)
        }
        Command::Register {
            name,
            email,
            phone,
            password,
        } => {
            let payload = RegisterPayload::customer(&name, &email, &phone, &password);
            emit(commands::auth_register(state, payload).await)
        }
        Command::Logout => emit(commands::auth_logout(state).await),
        Command::Token => emit(commands::session_token(state).await),
        Command::Refresh => emit(commands::session_refresh(state).await),
        Command::Me => emit(commands::user_me(state).await),
        Command::Restaurants { page } => emit(commands::restaurants_list(state, page).await),
        Command::Restaurant { id } => emit(commands::restaurant_get(state, &id).await),
        Command::ResetRequest { email } => {
            emit(commands::password_reset_request(state, &email).await)
        }
        Command::ResetPassword {
            otp,
            new_password,
            confirm,
        } => emit(commands::password_reset(state, &otp, &new_password, &confirm).await),
        Command::Config { .. } => ExitCode::FAILURE,
    }
}

pub fn run() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let settings_path = cli.settings.unwrap_or_else(default_settings_path);
    let settings = match SettingsStore::open(&settings_path) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(path = %settings_path.display(), error = %e, "cannot open settings");
            return emit(IpcResult::<()>::err(IpcErrorCode::Storage, e.to_string()));
        }
    };

    tracing::debug!(path = %settings.path().display(), "settings loaded");

    let command = match cli.command {
        Command::Config { action } => return run_config(&settings, action),
        other => other,
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(error = %e, "failed to start runtime");
            return ExitCode::FAILURE;
        }
    };

    let overrides = ClientOverrides {
        api_base_url: cli.api_base_url,
        token_store: cli.token_store,
        session_file: cli.session_file,
    };

    runtime.block_on(async move {
        let state = match AppState::build(settings, overrides) {
            Ok(state) => state,
            Err(e) => {
                tracing::error!(error = %e, "client startup failed");
                return emit(IpcResult::<()>::err(IpcErrorCode::Storage, e.to_string()));
            }
        };
        follow_session(&state.session);
        let code = dispatch(&state, command).await;
        tracing::debug!(state = ?state.session.state(), "session on exit");
        code
    })
}
