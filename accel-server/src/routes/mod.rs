use axum::middleware;
use axum::routing::{delete, get, post, put};
use axum::Router;

use crate::handlers::{auth, cache, lock, p2p, proxy, tuf, upstreams};
use crate::middleware::{auth_middleware, lock_gate_middleware};
use crate::state::AppState;

/// Builds the full admin/control API router, grouped by concern:
/// accelerator cache/upstream/pull, P2P, TUF, auth, and lock. Everything
/// except auth/lock sits behind the system-lockdown gate; everything
/// except public auth endpoints sits behind the bearer-token gate.
pub fn build_router(state: AppState) -> Router {
    let public_auth = Router::new()
        .route("/auth/login", post(auth::login_handler))
        .route("/auth/verify-token", post(auth::verify_token_handler));

    let protected_auth = Router::new()
        .route("/auth/logout", post(auth::logout_handler))
        .route("/auth/heartbeat", get(auth::heartbeat_handler))
        .route("/auth/me", get(auth::me_handler))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let lock_routes = Router::new()
        .route("/lock/status", get(lock::status_handler))
        .route("/lock/lock", post(lock::lock_handler))
        .route("/lock/unlock", post(lock::unlock_handler));

    let accel_routes = Router::new()
        .route("/accel/cache/stats", get(cache::stats_handler))
        .route("/accel/cache/entries", get(cache::entries_handler))
        .route(
            "/accel/cache/{digest}",
            get(cache::get_blob_handler).delete(cache::delete_blob_handler),
        )
        .route("/accel/cache", delete(cache::clear_handler))
        .route(
            "/accel/upstreams",
            get(upstreams::list_handler).post(upstreams::add_handler),
        )
        .route(
            "/accel/upstreams/{name}",
            put(upstreams::update_handler).delete(upstreams::remove_handler),
        )
        .route("/accel/upstreams/{name}/enable", post(upstreams::enable_handler))
        .route("/accel/upstreams/{name}/disable", post(upstreams::disable_handler))
        .route("/accel/upstreams/{name}/health", get(upstreams::health_handler))
        .route("/accel/pull/{name}/blobs/{digest}", get(proxy::pull_blob_handler))
        .route(
            "/accel/pull/{name}/manifests/{reference}",
            get(proxy::pull_manifest_handler),
        );

    let p2p_routes = Router::new()
        .route("/p2p/status", get(p2p::status_handler))
        .route("/p2p/peers", get(p2p::peers_handler))
        .route("/p2p/peers/connect", post(p2p::connect_peer_handler))
        .route("/p2p/peers/{id}", delete(p2p::disconnect_peer_handler))
        .route("/p2p/blobs", get(p2p::list_blobs_handler))
        .route("/p2p/blobs/{digest}", get(p2p::fetch_blob_handler))
        .route("/p2p/blobs/{digest}/announce", post(p2p::announce_blob_handler))
        .route("/p2p/enable", post(p2p::enable_handler))
        .route("/p2p/disable", post(p2p::disable_handler));

    let tuf_routes = Router::new()
        .route("/tuf/status", get(tuf::status_handler))
        .route("/tuf/initialize", post(tuf::initialize_handler))
        .route("/tuf/refresh", post(tuf::refresh_handler))
        .route("/tuf/expiry", get(tuf::expiry_handler))
        .route("/tuf/targets", post(tuf::add_target_handler))
        .route("/tuf/targets/verify", post(tuf::verify_target_handler))
        .route("/tuf/targets/{name}", delete(tuf::remove_target_handler))
        .route(
            "/tuf/delegations",
            get(tuf::list_delegations_handler).post(tuf::add_delegation_handler),
        )
        .route(
            "/tuf/delegations/{name}",
            delete(tuf::remove_delegation_handler),
        )
        .route("/tuf/keys/rotate/{role}", post(tuf::rotate_key_handler))
        .route("/tuf/keys/export", get(tuf::export_keys_handler))
        .route("/tuf/metadata/root.json", get(tuf::root_metadata_handler))
        .route("/tuf/metadata/targets.json", get(tuf::targets_metadata_handler))
        .route("/tuf/metadata/snapshot.json", get(tuf::snapshot_metadata_handler))
        .route("/tuf/metadata/timestamp.json", get(tuf::timestamp_metadata_handler));

    let gated = Router::new()
        .merge(protected_auth)
        .merge(accel_routes)
        .merge(p2p_routes)
        .merge(tuf_routes)
        .layer(middleware::from_fn_with_state(state.clone(), lock_gate_middleware));

    Router::new()
        .merge(public_auth)
        .merge(lock_routes)
        .merge(gated)
        .with_state(state)
}
