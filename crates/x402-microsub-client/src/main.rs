use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use x402::{
    decode_payment_header, LocalWalletSigner, PaymentConfig, PaymentHeaderController,
    RequestAuthorization, X402Error, MICROSUB_HEADER, PAYMENT_HEADER,
};
use x402_client::{HttpMicrosubSource, MicrosubRegistry, RegistryOptions};

/// Produce the authorization for one paid x402 request.
///
/// Prints an `X-MICROSUB-TX` reference when the wallet owns a usable
/// microsub credit, otherwise a freshly signed `X-PAYMENT` header.
#[derive(Parser, Debug)]
#[command(name = "x402-microsub", version)]
struct Cli {
    /// Decode a base64 payment header and print it as JSON.
    #[arg(long, value_name = "HEADER")]
    decode: Option<String>,

    /// Base URL of the backend that lists microsub credits.
    #[arg(long, env = "MICROSUB_API_URL")]
    api_url: Option<String>,

    /// Restrict credits to one resource kind, e.g. `data-room`.
    #[arg(long, env = "MICROSUB_SCOPE")]
    scope: Option<String>,

    /// Payment amount in the token's smallest unit.
    #[arg(long)]
    amount: Option<String>,

    /// Always sign a new payment, ignoring credits.
    #[arg(long)]
    pay: bool,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,x402=info,x402_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        tracing::error!(error = %e, "x402-microsub failed");
        eprintln!("{}", e.user_message());
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), X402Error> {
    if let Some(encoded) = cli.decode {
        let payload = decode_payment_header(&encoded)?;
        let json = serde_json::to_string_pretty(&payload)
            .map_err(|e| X402Error::EncodeError(e.to_string()))?;
        println!("{json}");
        return Ok(());
    }

    let config = PaymentConfig::from_env()?;
    let key = std::env::var("EVM_PRIVATE_KEY")
        .map_err(|_| X402Error::ConfigError("EVM_PRIVATE_KEY is not set".to_string()))?;
    let wallet = LocalWalletSigner::from_private_key(&key)?;
    let controller = PaymentHeaderController::with_wallet(config, wallet);

    let address = controller
        .wallet_address()
        .ok_or(X402Error::WalletNotConnected)?;
    tracing::info!(wallet = %address, network = %controller.config().network, "wallet loaded");

    let selection = match (&cli.api_url, cli.pay) {
        (Some(api_url), false) => {
            let registry = MicrosubRegistry::new(
                HttpMicrosubSource::new(api_url)?,
                RegistryOptions {
                    auto_select_valid: true,
                    scope: cli.scope.clone(),
                },
            );
            // A credit lookup failure still allows paying directly.
            if let Err(e) = registry.select_wallet(Some(address.to_string())).await {
                tracing::warn!(error = %e, "could not load microsubs, paying directly");
            }
            let snapshot = registry.snapshot();
            for m in &snapshot.microsubs {
                tracing::info!(
                    tx_hash = %m.tx_hash,
                    remaining = m.queries_remaining,
                    usable = !m.disabled(),
                    "microsub"
                );
            }
            registry.shutdown();
            snapshot.selected
        }
        _ => None,
    };

    let auth = controller
        .authorize_request(selection.as_ref(), cli.amount.as_deref())
        .await?;
    match auth {
        RequestAuthorization::Microsub { tx_hash } => println!("{MICROSUB_HEADER}: {tx_hash}"),
        RequestAuthorization::Payment(header) => {
            println!("{PAYMENT_HEADER}: {}", header.encoded)
        }
    }
    Ok(())
}
