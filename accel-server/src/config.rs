//! Server configuration: CLI flags with environment-variable fallbacks
//! via `clap::Parser`'s `env` attribute.

use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "accel-server")]
#[command(about = "Registry pull-through accelerator: admin/control API")]
pub struct Args {
    /// Directory holding blob cache, upstream config, TUF metadata, audit
    /// log, and P2P identity.
    #[arg(long, env = "ACCEL_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// Bind address for the admin/control API.
    #[arg(long, env = "ACCEL_HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Bind port for the admin/control API.
    #[arg(long, env = "ACCEL_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Shared secret used to sign and verify session JWTs. Required;
    /// failure to read it is a fatal bootstrap error.
    #[arg(long, env = "ACCEL_JWT_SECRET")]
    pub jwt_secret: String,

    /// Bootstrap admin password, used to seed the lock service's unlock
    /// credential and the initial admin account.
    #[arg(long, env = "ACCEL_ADMIN_PASSWORD")]
    pub admin_password: String,

    /// Maximum bytes the LRU blob cache may hold.
    #[arg(long, env = "ACCEL_CACHE_MAX_SIZE", default_value_t = 10 * 1024 * 1024 * 1024)]
    pub cache_max_size: u64,

    /// Port the P2P node listens on (TCP).
    #[arg(long, env = "ACCEL_P2P_PORT", default_value_t = 4001)]
    pub p2p_port: u16,

    /// Disable the P2P blob-exchange node entirely.
    #[arg(long, env = "ACCEL_P2P_DISABLED", default_value_t = false)]
    pub p2p_disabled: bool,

    /// Explicit P2P bootstrap peer addresses (`host:port`), comma-separated.
    #[arg(long, env = "ACCEL_P2P_BOOTSTRAP", value_delimiter = ',')]
    pub p2p_bootstrap: Vec<String>,

    /// Maximum concurrently-running automation tasks.
    #[arg(long, env = "ACCEL_AUTOMATION_MAX_CONCURRENT", default_value_t = 4)]
    pub automation_max_concurrent: usize,

    /// Issuer claim embedded in minted JWTs.
    #[arg(long, env = "ACCEL_JWT_ISSUER", default_value = "accel-server")]
    pub jwt_issuer: String,
}
