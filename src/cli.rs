use clap::{Parser, Subcommand};

/// SSO Gateway: signed cross-application tokens
#[derive(Parser)]
#[command(name = "sso-gateway", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to bind (overrides SSO_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Issue or inspect tokens without going through HTTP
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },

    /// Print a fresh random signing secret for SSO_SECRET_KEY
    Keygen,
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Issue a token for a user in the configured directory
    Issue {
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        target_app: String,
        /// Lifetime in seconds
        #[arg(long, default_value = "300")]
        expires_in: i64,
        #[arg(long, value_delimiter = ',')]
        permissions: Option<Vec<String>>,
    },
    /// Verify a token and print its claims
    Verify {
        #[arg(long)]
        token: String,
        /// Permissions the token must carry
        #[arg(long, value_delimiter = ',')]
        require: Option<Vec<String>>,
    },
}
