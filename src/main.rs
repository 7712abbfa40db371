use std::path::PathBuf;

use clap::{Parser, Subcommand};
use qrcode::{render::unicode, QrCode};
use tokio::sync::mpsc;
use wa_web_core::{
    ClientConfig, ConnectionManager, Event, FileSessionStore, SessionStore, WebhookForwarder,
};

/// Demo CLI for the WhatsApp Web protocol core.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// JSON configuration file. Missing fields take their defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the directory holding sessions.
    #[arg(long)]
    session_dir: Option<String>,

    /// Override the user agent advertised by the client.
    #[arg(long)]
    user_agent: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Connect, link the device if needed and print incoming messages.
    Connect {
        /// Link with a pairing code sent to this phone number instead of a QR code.
        #[arg(long)]
        phone: Option<String>,
    },
    /// Print the effective configuration.
    ShowConfig,
    /// Forget the stored session.
    ClearSession,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => ClientConfig::from_json_file(path)?,
        None => ClientConfig::default(),
    };
    if let Some(dir) = cli.session_dir {
        config = config.with_session_dir(dir);
    }
    if let Some(agent) = cli.user_agent {
        config = config.with_user_agent(agent);
    }

    match cli.command {
        Commands::Connect { phone } => {
            if let Some(phone) = phone {
                config = config.with_pairing_code(phone);
            }
            run(config).await?;
        }
        Commands::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::ClearSession => {
            FileSessionStore::new(config.session_dir.clone()).clear(&config.session_id)?;
            println!("Cleared session {:?} in {}", config.session_id, config.session_dir);
        }
    }

    Ok(())
}

async fn run(config: ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    let manager = ConnectionManager::from_config(config.clone());
    let _webhook = match config.webhook {
        Some(webhook) => Some(WebhookForwarder::attach(manager.events(), webhook)?),
        None => None,
    };

    let (stop_tx, mut stop_rx) = mpsc::unbounded_channel::<String>();
    manager.events().subscribe_all(move |event| match event {
        Event::Qr(qr) => match render_qr(qr) {
            Ok(image) => println!("Scan with WhatsApp > Linked devices:\n{image}"),
            Err(e) => println!("QR (render failed: {e}): {qr}"),
        },
        Event::QrExpired => println!("QR code expired."),
        Event::PairingCode { code } => println!("Enter this code on your phone: {code}"),
        Event::PairingCodeExpired => println!("Pairing code expired."),
        Event::AuthSuccess { user } => println!("Logged in as {}", user.id),
        Event::AuthFailure { error } => {
            let _ = stop_tx.send(format!("authentication failed: {error}"));
        }
        Event::ConnectionUpdate(update) => println!("Connection: {} -> {}", update.from, update.state),
        Event::ConnectionFailed => {
            let _ = stop_tx.send("gave up reconnecting".into());
        }
        Event::MessageNew(message) if !message.from_me => {
            let text = message.text().unwrap_or("<non-text message>");
            println!("[{}] {}: {}", message.chat_id, message.sender_id, text);
        }
        _ => {}
    });

    manager.connect().await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => println!("Shutting down."),
        Some(reason) = stop_rx.recv() => eprintln!("Stopped: {reason}"),
    }
    manager.shutdown();
    Ok(())
}

fn render_qr(data: &str) -> Result<String, qrcode::types::QrError> {
    let code = QrCode::new(data.as_bytes())?;
    Ok(code
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .build())
}
