use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

// `#[zbus::proxy]` generates `FacegateProxy` (async) alongside a blocking
// variant; the CLI runs on tokio and uses the async one.
#[zbus::proxy(
    interface = "org.facegate.Auth1",
    default_service = "org.facegate.Auth1",
    default_path = "/org/facegate/Auth1"
)]
trait Facegate {
    async fn register(&self, name: &str, email: &str, images: Vec<String>) -> zbus::Result<String>;
    async fn authenticate(&self, image: String, liveness_frames: Vec<String>)
        -> zbus::Result<String>;
    async fn check_liveness(&self, frames: Vec<String>) -> zbus::Result<String>;
    async fn simple_liveness(&self, image: String) -> zbus::Result<String>;
    async fn verify_token(&self, token: &str) -> zbus::Result<String>;
    async fn list_users(&self) -> zbus::Result<String>;
    async fn delete_user(&self, id: i64) -> zbus::Result<bool>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "facegate", about = "facegate face authentication CLI")]
struct Cli {
    /// Talk to a daemon on the session bus (development mode)
    #[arg(long, global = true)]
    session: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new user from 3 to 10 face images
    Register {
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        email: String,
        /// Image files (PNG or JPEG)
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Identify a face among registered users
    Authenticate {
        image: PathBuf,
        /// Frames for a blink liveness check before matching
        #[arg(short, long = "frame")]
        frames: Vec<PathBuf>,
    },
    /// Blink liveness check over a frame sequence
    Liveness {
        #[arg(required = true)]
        frames: Vec<PathBuf>,
    },
    /// Single-image sharpness/contrast liveness check
    Check { image: PathBuf },
    /// Validate a session token
    VerifyToken { token: String },
    /// List registered users
    Users,
    /// Delete a user and their face signatures
    Remove {
        /// User ID to remove
        id: i64,
    },
    /// Show daemon status
    Status,
}

/// Read an image file into the base64 payload the daemon expects.
fn read_payload(path: &Path) -> Result<String> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(facegate_core::codec::encode_image_payload(&bytes))
}

fn read_payloads(paths: &[PathBuf]) -> Result<Vec<String>> {
    paths.iter().map(|p| read_payload(p)).collect()
}

/// Re-indent a JSON reply for the terminal.
fn pretty(json: &str) -> String {
    serde_json::from_str::<serde_json::Value>(json)
        .and_then(|v| serde_json::to_string_pretty(&v))
        .unwrap_or_else(|_| json.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = if cli.session {
        zbus::Connection::session().await
    } else {
        zbus::Connection::system().await
    }
    .context("failed to connect to D-Bus")?;
    let proxy = FacegateProxy::new(&conn)
        .await
        .context("facegated is not reachable")?;

    let reply = match cli.command {
        Commands::Register {
            name,
            email,
            images,
        } => {
            tracing::debug!(count = images.len(), "registering");
            proxy
                .register(&name, &email, read_payloads(&images)?)
                .await?
        }
        Commands::Authenticate { image, frames } => {
            proxy
                .authenticate(read_payload(&image)?, read_payloads(&frames)?)
                .await?
        }
        Commands::Liveness { frames } => proxy.check_liveness(read_payloads(&frames)?).await?,
        Commands::Check { image } => proxy.simple_liveness(read_payload(&image)?).await?,
        Commands::VerifyToken { token } => proxy.verify_token(&token).await?,
        Commands::Users => proxy.list_users().await?,
        Commands::Remove { id } => {
            proxy.delete_user(id).await?;
            format!("Removed user {id}")
        }
        Commands::Status => proxy.status().await?,
    };

    println!("{}", pretty(&reply));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_register() {
        let cli = Cli::try_parse_from([
            "facegate", "register", "-n", "Alice", "-e", "a@example.com", "a.png", "b.png",
            "c.png",
        ])
        .unwrap();
        match cli.command {
            Commands::Register { name, images, .. } => {
                assert_eq!(name, "Alice");
                assert_eq!(images.len(), 3);
            }
            _ => panic!("expected register"),
        }
    }

    #[test]
    fn test_cli_parses_authenticate_frames() {
        let cli = Cli::try_parse_from([
            "facegate", "--session", "authenticate", "probe.png", "--frame", "f1.png", "--frame",
            "f2.png",
        ])
        .unwrap();
        assert!(cli.session);
        match cli.command {
            Commands::Authenticate { frames, .. } => assert_eq!(frames.len(), 2),
            _ => panic!("expected authenticate"),
        }
    }

    #[test]
    fn test_pretty_passes_through_non_json() {
        assert_eq!(pretty("Removed user 3"), "Removed user 3");
        assert_eq!(pretty(r#"{"a":1}"#), "{\n  \"a\": 1\n}");
    }

    #[test]
    fn test_read_payload_missing_file() {
        let err = read_payload(Path::new("/nonexistent/face.png")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/face.png"));
    }
}
