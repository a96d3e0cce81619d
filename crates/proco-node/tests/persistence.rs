mod helpers;

use helpers::test_config;
use proco_core::crypto::KeyPair;
use proco_node::{Node, NodeError};
use proco_storage::{json_store::JsonFileStore, sled_store::SledStore, SnapshotStore};

async fn populated_node() -> anyhow::Result<Node> {
    let node = Node::new(test_config(&[]));
    node.create_transaction(KeyPair::generate().transfer("bob", 1))
        .await?;
    node.create_block(None).await?;
    node.create_transaction(KeyPair::generate().transfer("carol", 2))
        .await?;
    Ok(node)
}

fn assert_restored(original: &Node, store: &dyn SnapshotStore) -> anyhow::Result<()> {
    let restored = Node::load(test_config(&[]), store)?;
    assert_eq!(restored.get_chain(), original.get_chain());
    assert_eq!(
        restored.pending_transactions(),
        original.pending_transactions()
    );
    assert!(restored.validate_chain().is_valid());
    Ok(())
}

#[tokio::test]
async fn test_node_survives_restart_with_json_store() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = JsonFileStore::in_dir(dir.path())?;
    let node = populated_node().await?;
    node.save(&store)?;
    assert_restored(&node, &store)
}

#[tokio::test]
async fn test_node_survives_restart_with_sled_store() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let node = populated_node().await?;
    {
        let store = SledStore::open(dir.path().join("sled"))?;
        node.save(&store)?;
    }
    let store = SledStore::open(dir.path().join("sled"))?;
    assert_restored(&node, &store)
}

#[test]
fn test_empty_store_starts_from_genesis() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = JsonFileStore::in_dir(dir.path())?;
    let node = Node::load(test_config(&[]), &store)?;
    assert_eq!(node.get_chain().len(), 1);
    assert_eq!(node.get_chain()[0].previous_hash, "");
    Ok(())
}

#[test]
fn test_corrupt_snapshot_is_a_storage_error() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = JsonFileStore::in_dir(dir.path())?;
    std::fs::write(store.path(), b"{ not a snapshot")?;
    assert!(matches!(
        Node::load(test_config(&[]), &store),
        Err(NodeError::Storage(_))
    ));
    Ok(())
}
