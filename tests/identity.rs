//! Integration tests for the peer and token registries and their merge.

mod common;

use std::sync::Arc;

use alloy::primitives::Address;
use common::*;
use lens_data::store::{upsert_typed, ONES, PEERS, TOKENS};
use lens_data::{MemoryStore, RecordStore, SqliteStore};
use lens_identity::{consolidate_ones, Field, IdentityConfig, Peer, PeerRegistry, TokenInfo};

const SHARED: Address = Address::repeat_byte(0xab);

fn peers(store: Arc<dyn RecordStore>, names: Arc<FakeNames>) -> PeerRegistry {
    PeerRegistry::load(
        store,
        names,
        Arc::new(FakeExchange::default()),
        &IdentityConfig::default(),
    )
    .expect("registry loads")
}

/// A peer whose `ens` is already settled as absent is never looked up again.
#[tokio::test]
async fn settled_ens_is_not_looked_up_twice() {
    let store = Arc::new(MemoryStore::new());
    let names = Arc::new(FakeNames::default());
    let registry = peers(store.clone(), names.clone());

    let id = registry.get(&format!("{SHARED:#x}")).expect("get");
    assert_eq!(registry.resolve_ens(id).await.expect("resolve"), Field::Absent);
    assert_eq!(names.call_count(), 1);

    assert_eq!(registry.resolve_ens(id).await.expect("resolve"), Field::Absent);
    assert_eq!(names.call_count(), 1);

    let stored = store.load_all(PEERS).expect("load");
    assert_eq!(stored[0].1["ens"], ".");
}

#[tokio::test]
async fn stored_absent_marker_is_honoured_after_reload() {
    let store = Arc::new(MemoryStore::new());
    let peer = serde_json::json!({
        "address": format!("{SHARED:#x}"),
        "ens": ".",
        "loopringENS": "..",
        "loopringID": "",
    });
    store
        .upsert(PEERS, &format!("{SHARED:#x}"), &peer)
        .expect("seed");

    let names = Arc::new(FakeNames::default());
    let registry = peers(store, names.clone());
    let id = registry
        .find(&format!("{SHARED:#x}"))
        .expect("find")
        .expect("indexed");
    let resolved = registry.resolve_all(id).await.expect("resolve");

    assert_eq!(resolved.ens, Field::Absent);
    assert_eq!(resolved.loopring_ens, Field::Absent);
    assert_eq!(names.call_count(), 0);
}

#[tokio::test]
async fn concurrent_gets_create_one_peer() {
    let store = Arc::new(MemoryStore::new());
    let registry = Arc::new(peers(store.clone(), Arc::new(FakeNames::default())));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let registry = registry.clone();
            tokio::spawn(async move { registry.get("shared.eth").expect("get") })
        })
        .collect();
    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.expect("join"));
    }

    assert!(ids.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(store.load_all(PEERS).expect("load").len(), 1);
}

#[tokio::test]
async fn resolved_peer_persists_in_sqlite() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("lens.sqlite");
    let path = path.to_str().expect("utf-8 path");

    let mut names = FakeNames::default();
    names.forward.insert("shared.eth".into(), SHARED);
    names.reverse.insert(SHARED, "shared.eth".into());
    {
        let store = Arc::new(SqliteStore::new(path).expect("open"));
        let registry = peers(store, Arc::new(names));
        let id = registry.get("shared.eth").expect("get");
        let peer = registry.resolve_all(id).await.expect("resolve");
        assert_eq!(peer.address, Field::Known(SHARED));
    }

    let store = Arc::new(SqliteStore::new(path).expect("reopen"));
    let names = Arc::new(FakeNames::default());
    let registry = peers(store, names.clone());
    let id = registry
        .find(&format!("{SHARED:#x}"))
        .expect("find")
        .expect("address indexed after reload");
    let peer = registry.peer(id).expect("peer");
    assert_eq!(peer.ens, Field::Known("shared.eth".into()));
    assert_eq!(peer.loopring_id, Field::Absent);
    registry.resolve_all(id).await.expect("resolve");
    assert_eq!(names.call_count(), 0);
}

/// A peer and a token sharing an address merge into one record carrying the
/// peer's names and the token's metadata.
#[test]
fn consolidation_merges_peer_and_token() {
    let store = MemoryStore::new();
    let key = format!("{SHARED:#x}");
    let peer = Peer {
        address: Field::Known(SHARED),
        ens: Field::Known("shared.eth".into()),
        loopring_ens: Field::Absent,
        loopring_id: Field::Known("4242".into()),
    };
    let token = TokenInfo {
        symbol: Field::Known("SHR".into()),
        address: Field::Known(SHARED),
        decimals: Field::Known(18),
        token_id: Field::Known(9),
    };
    upsert_typed(&store, PEERS, &key, &peer).expect("peer");
    upsert_typed(&store, TOKENS, "SHR", &token).expect("token");

    let ones = consolidate_ones(&store).expect("consolidate");
    assert_eq!(ones.len(), 1);
    let one = &ones[&key];
    assert_eq!(one.ens, Field::Known("shared.eth".into()));
    assert_eq!(one.loopring_id, Field::Known("4242".into()));
    assert_eq!(one.symbol, Field::Known("SHR".into()));
    assert_eq!(one.decimals, Field::Known(18));

    let stored = store.load_all(ONES).expect("ones");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].0, key);
    assert_eq!(stored[0].1["address"], key.as_str());
    assert_eq!(stored[0].1["loopringID"], "4242");
    assert_eq!(stored[0].1["symbol"], "SHR");
}
