use anyhow::Result;

use provchain_core::{
    block::{meets_difficulty, EventType, GENESIS_MARKER},
    catalog::InMemoryCatalog,
    chain::Chain,
    config::LedgerConfig,
    recorder::{DomainEvent, EventRecorder},
};

#[test]
fn shipped_event_end_to_end() -> Result<()> {
    let chain = Chain::new(&LedgerConfig::with_difficulty(4))?;
    assert_eq!(chain.len(), 1);

    let catalog = InMemoryCatalog::new([42]);
    let receipt = EventRecorder::new(&chain, &catalog).record(DomainEvent::new(42, "SHIPPED"))?;
    assert_eq!(receipt.block_index, 1);
    assert!(receipt.block_hash.starts_with("0000"));

    let block = chain.block(1).expect("block 1 exists");
    let payload = block.data.as_event().expect("event payload");
    assert_eq!(payload.product_id, 42);
    assert_eq!(payload.event_type, EventType::Shipped);

    let history: Vec<_> = chain.history(42).collect();
    assert_eq!(history.len(), 1);
    assert_eq!(*history[0], *block);

    let info = chain.info();
    assert!(info.is_valid);
    assert_eq!(info.chain_length, 2);
    assert_eq!(info.difficulty, 4);
    Ok(())
}

#[test]
fn every_block_satisfies_chain_invariants() -> Result<()> {
    let chain = Chain::new(&LedgerConfig::with_difficulty(2))?;
    let catalog = InMemoryCatalog::open();
    let recorder = EventRecorder::new(&chain, &catalog);
    for (pid, ty) in [(1, "CREATED"), (2, "CREATED"), (1, "SHIPPED"), (1, "DELIVERED")] {
        recorder.record(DomainEvent::new(pid, ty))?;
        assert_eq!(chain.validate(), (true, None));
    }

    let blocks = chain.blocks();
    let genesis = &blocks[0];
    assert_eq!(genesis.index, 0);
    assert_eq!(genesis.previous_hash, "0");
    assert_eq!(genesis.data.product_id(), None);
    assert_eq!(
        serde_json::to_value(&genesis.data)?,
        serde_json::Value::String(GENESIS_MARKER.into())
    );

    for pair in blocks.windows(2) {
        assert_eq!(pair[1].index, pair[0].index + 1);
        assert_eq!(pair[1].previous_hash, pair[0].hash);
        assert_eq!(pair[1].hash, pair[1].compute_hash()?);
        assert!(meets_difficulty(&pair[1].hash, 2));
    }

    let product_1: Vec<u64> = chain.history(1).map(|b| b.index).collect();
    assert_eq!(product_1, vec![1, 3, 4]);
    assert!(chain.history(3).next().is_none());
    Ok(())
}

#[test]
fn history_serializes_as_block_objects() -> Result<()> {
    let chain = Chain::new(&LedgerConfig::with_difficulty(1))?;
    let catalog = InMemoryCatalog::open();
    let mut ev = DomainEvent::new(9, "received");
    ev.actor = Some("Warehouse clerk".into());
    EventRecorder::new(&chain, &catalog).record(ev)?;

    let json = serde_json::to_value(chain.history(9).collect::<Vec<_>>())?;
    let obj = json[0].as_object().expect("block object");
    for key in ["index", "timestamp", "data", "previous_hash", "hash", "nonce"] {
        assert!(obj.contains_key(key), "missing {key}");
    }
    assert_eq!(json[0]["data"]["event_type"], "RECEIVED");
    assert_eq!(json[0]["data"]["actor"], "Warehouse clerk");
    assert!(json[0]["data"].get("location").is_none());
    Ok(())
}
