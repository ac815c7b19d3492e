//! Carts survive a close and reopen of an on-disk database

use linkdb::{
    CartId, CartItem, CartStore, Database, JsonCartStore, Product, ProductCatalog,
    RelationalCartStore,
};
use tempfile::TempDir;

#[test]
fn carts_survive_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let db = Database::open(dir.path()).unwrap();
        let catalog = ProductCatalog::new(db.clone()).unwrap();
        catalog.upsert(&Product::new("p1", "Tea", 250)).unwrap();
        catalog.upsert(&Product::new("p2", "Cup", 900)).unwrap();

        let relational = RelationalCartStore::new(db.clone()).unwrap();
        let json = JsonCartStore::new(db.clone()).unwrap();
        let r = relational.create_cart(Some(CartId::new("r1"))).unwrap();
        relational.replace_items(&r, &[CartItem::new("p2", 1)]).unwrap();
        let j = json.create_cart(Some(CartId::new("j1"))).unwrap();
        json.replace_items(&j, &[CartItem::new("p2", 1), CartItem::new("p1", 4)])
            .unwrap();
        db.shutdown().unwrap();
    }
    assert!(dir.path().join("linkdb.ckpt").exists());

    let db = Database::open(dir.path()).unwrap();
    let relational = RelationalCartStore::new(db.clone()).unwrap();
    let json = JsonCartStore::new(db.clone()).unwrap();
    assert_eq!(
        relational.get_cart(&CartId::new("r1")).unwrap().unwrap().items,
        vec![CartItem::new("p2", 1)]
    );
    assert_eq!(
        json.get_cart(&CartId::new("j1")).unwrap().unwrap().items,
        vec![CartItem::new("p2", 1), CartItem::new("p1", 4)]
    );
    assert_eq!(ProductCatalog::new(db).unwrap().list().unwrap().len(), 2);
}

#[test]
fn config_file_is_written_on_first_open() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path()).unwrap();
    assert!(dir.path().join("linkdb.toml").exists());
    assert!(db.config().checkpoint_on_close);
}
