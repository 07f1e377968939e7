use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use accel_core::audit::AuditLog;
use accel_core::auth::{AuthService, InMemoryPatStore, InMemorySessionStore, InMemoryUserStore};
use accel_core::automation::AutomationEngine;
use accel_core::blob::FileBlobStore;
use accel_core::cache::LruCache;
use accel_core::p2p::{BootstrapDiscovery, DhtDiscovery, MdnsDiscovery, NodeConfig, P2pNode, PeerDiscovery};
use accel_core::proxy::ProxyService;
use accel_core::security::{IntrusionDetector, IntrusionThresholds, LockService};
use accel_core::tuf::TufManager;
use accel_core::upstream::UpstreamRouter;
use accel_core::ws::WsHub;

use crate::config::Args;

/// Everything a request handler needs, threaded through as explicit
/// dependency-injected state rather than process-level globals -- per the
/// design's treatment of "singleton" services.
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<LruCache>,
    pub upstreams: Arc<UpstreamRouter>,
    pub proxy: Arc<ProxyService>,
    pub p2p: Option<Arc<P2pNode>>,
    /// Admin-toggleable gate consulted by the proxy handler before it
    /// tries the P2P path; independent of whether a node was constructed
    /// at all (`p2p.is_none()` means P2P was disabled at startup).
    pub p2p_enabled: Arc<AtomicBool>,
    pub tuf: Arc<TufManager>,
    pub lock: Arc<LockService>,
    pub intrusion: Arc<IntrusionDetector>,
    pub auth: Arc<AuthService>,
    pub audit: Arc<AuditLog>,
    pub automation: Arc<AutomationEngine>,
    pub ws: Arc<WsHub>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}

impl AppState {
    pub async fn bootstrap(args: &Args) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&args.data_dir).await?;

        let cache = Arc::new(LruCache::open(args.data_dir.join("blobs"), args.cache_max_size).await?);
        let upstreams = Arc::new(UpstreamRouter::load(args.data_dir.join("upstreams.json")).await);
        let proxy = Arc::new(ProxyService::new(cache.clone(), upstreams.clone()));

        let admin_password_hash = hash_admin_password(&args.admin_password)?;
        let lock = Arc::new(LockService::new(admin_password_hash));
        let intrusion = Arc::new(IntrusionDetector::new(IntrusionThresholds::default(), lock.clone()));

        let users = Arc::new(InMemoryUserStore::new());
        seed_admin_user(&users, &args.admin_password)?;
        let sessions = Arc::new(InMemorySessionStore::new());
        let pats = Arc::new(InMemoryPatStore::new());
        let auth = Arc::new(AuthService::new(
            args.jwt_secret.clone(),
            args.jwt_issuer.clone(),
            users,
            sessions,
            pats,
            lock.clone(),
            intrusion.clone(),
        ));

        let audit = Arc::new(AuditLog::open(args.data_dir.join("audit.log")).await?);
        let automation = Arc::new(AutomationEngine::new(args.automation_max_concurrent, HashMap::new()));
        let ws = Arc::new(WsHub::new());

        let tuf = Arc::new(TufManager::new(args.data_dir.join("tuf")));

        let p2p = if args.p2p_disabled {
            None
        } else {
            let blob_store = Arc::new(FileBlobStore::open(args.data_dir.join("blobs")).await?);
            let discovery: Vec<Arc<dyn PeerDiscovery>> = vec![
                Arc::new(BootstrapDiscovery::new(parse_bootstrap(&args.p2p_bootstrap))),
                Arc::new(MdnsDiscovery {
                    service_tag: "_accel._tcp".to_string(),
                }),
                Arc::new(DhtDiscovery {
                    rendezvous: "accel-rendezvous".to_string(),
                }),
            ];
            let config = NodeConfig {
                listen_addr: std::net::SocketAddr::new(args.host, args.p2p_port),
                data_dir: args.data_dir.join("p2p"),
                advertised_addrs: vec![args.host],
                relay_capable: true,
            };
            Some(Arc::new(P2pNode::new(config, blob_store, discovery).await?))
        };

        Ok(Self {
            cache,
            upstreams,
            proxy,
            p2p,
            p2p_enabled: Arc::new(AtomicBool::new(true)),
            tuf,
            lock,
            intrusion,
            auth,
            audit,
            automation,
            ws,
        })
    }

    /// Starts every background-task-bearing component. Fallible setup
    /// happens before the HTTP listener binds; background loops start
    /// after.
    pub async fn start_background_tasks(&self) -> anyhow::Result<()> {
        if let Some(p2p) = &self.p2p {
            p2p.start().await?;
        }
        self.tuf.start().await;
        self.automation.start().await;
        Ok(())
    }

    pub async fn stop_background_tasks(&self) {
        if let Some(p2p) = &self.p2p {
            p2p.stop().await;
        }
        self.tuf.stop().await;
        self.automation.stop().await;
    }
}

fn hash_admin_password(password: &str) -> anyhow::Result<String> {
    use argon2::password_hash::{PasswordHasher, SaltString};
    use argon2::Argon2;
    use rand::rngs::OsRng;

    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("failed to hash admin password: {e}"))?;
    Ok(hash.to_string())
}

fn seed_admin_user(users: &Arc<InMemoryUserStore>, admin_password: &str) -> anyhow::Result<()> {
    use accel_core::auth::User;
    use uuid::Uuid;

    let password_hash = hash_admin_password(admin_password)?;
    users.insert(User {
        id: Uuid::new_v4(),
        username: "admin".to_string(),
        password_hash,
        role: "admin".to_string(),
        active: true,
        must_change_password: false,
    });
    Ok(())
}

fn parse_bootstrap(entries: &[String]) -> Vec<std::net::SocketAddr> {
    entries
        .iter()
        .filter_map(|s| s.trim().parse().ok())
        .collect()
}
