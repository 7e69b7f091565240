mod common;

use common::{cart, product, Harness};
use inventory_service::store::InventoryStore;
use proptest::prelude::*;
use shared::OwnerKey;
use std::sync::Arc;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reservations_never_oversell() {
    let a = product(10, 2);
    let h = Arc::new(Harness::new([a.clone()]));
    let product_id = a.id;

    let mut tasks = Vec::new();
    for i in 0..50 {
        let h = h.clone();
        tasks.push(tokio::spawn(async move {
            h.inventory
                .reservations
                .reserve(product_id, 1, &cart(&format!("c{}", i)), None)
                .await
                .unwrap()
                .is_reserved()
        }));
    }

    let mut reserved = 0;
    for task in tasks {
        if task.await.unwrap() {
            reserved += 1;
        }
    }
    assert_eq!(reserved, 10);

    let availability = h.inventory.availability.check_availability(a.id, 1).await.unwrap();
    assert_eq!(availability.reserved_stock, 10);
    assert!(availability.is_out_of_stock);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_decreases_and_reservations_share_one_guard() {
    let a = product(20, 2);
    let h = Arc::new(Harness::new([a.clone()]));
    let product_id = a.id;

    let mut tasks = Vec::new();
    for i in 0..40 {
        let h = h.clone();
        tasks.push(tokio::spawn(async move {
            if i % 2 == 0 {
                h.inventory
                    .reservations
                    .reserve(product_id, 1, &cart(&format!("c{}", i)), None)
                    .await
                    .unwrap()
                    .is_reserved()
            } else {
                h.inventory.stock.decrease(product_id, 1, "sale", None).await.unwrap().is_applied()
            }
        }));
    }

    let mut succeeded = 0;
    for task in tasks {
        if task.await.unwrap() {
            succeeded += 1;
        }
    }
    assert_eq!(succeeded, 20);

    let now = h.now();
    let levels = h.store.product_levels(&[a.id], now).await.unwrap();
    assert_eq!(levels[0].available(), 0);
}

#[derive(Debug, Clone)]
enum Op {
    Reserve { owner: u8, quantity: i32, ttl: i64 },
    Release { owner: u8 },
    Convert { owner: u8 },
    Extend { owner: u8, minutes: i64 },
    Increase(i32),
    Decrease(i32),
    Adjust(i32),
    Advance(i64),
    Sweep,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0u8..4, 1i32..8, 1i64..30).prop_map(|(owner, quantity, ttl)| Op::Reserve { owner, quantity, ttl }),
        1 => (0u8..4).prop_map(|owner| Op::Release { owner }),
        2 => (0u8..4).prop_map(|owner| Op::Convert { owner }),
        1 => (0u8..4, 1i64..60).prop_map(|(owner, minutes)| Op::Extend { owner, minutes }),
        1 => (1i32..6).prop_map(Op::Increase),
        2 => (1i32..6).prop_map(Op::Decrease),
        1 => (0i32..20).prop_map(Op::Adjust),
        2 => (0i64..20).prop_map(Op::Advance),
        1 => Just(Op::Sweep),
    ]
}

fn owner(n: u8) -> OwnerKey {
    cart(&format!("owner-{}", n))
}

async fn apply(h: &Harness, product_id: uuid::Uuid, op: Op) {
    let inv = &h.inventory;
    match op {
        Op::Reserve { owner: o, quantity, ttl } => {
            inv.reservations.reserve(product_id, quantity, &owner(o), Some(ttl)).await.unwrap();
        }
        Op::Release { owner: o } => {
            inv.reservations.release_all(&owner(o)).await.unwrap();
        }
        Op::Convert { owner: o } => {
            inv.reservations.convert_to_sale(&owner(o)).await.unwrap();
        }
        Op::Extend { owner: o, minutes } => {
            for hold in inv.reservations.active_reservations(&owner(o)).await.unwrap() {
                inv.reservations.extend(hold.id, minutes).await.unwrap();
            }
        }
        Op::Increase(quantity) => {
            inv.stock.increase(product_id, quantity, "restock", None).await.unwrap();
        }
        Op::Decrease(quantity) => {
            inv.stock.decrease(product_id, quantity, "sale", None).await.unwrap();
        }
        Op::Adjust(target) => {
            inv.stock.adjust(product_id, target, "count", None).await.unwrap();
        }
        Op::Advance(minutes) => h.advance_minutes(minutes),
        Op::Sweep => {
            inv.reservations.sweep_expired().await.unwrap();
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn available_stock_never_goes_negative(ops in prop::collection::vec(op(), 1..40)) {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(async {
            let a = product(10, 3);
            let h = Harness::new([a.clone()]);

            for step in ops {
                apply(&h, a.id, step.clone()).await;

                let now = h.now();
                let levels = h.store.product_levels(&[a.id], now).await.unwrap();
                let levels = &levels[0];
                assert!(levels.product.stock >= 0, "stock negative after {:?}", step);
                assert!(levels.available() >= 0, "available {} after {:?}", levels.available(), step);

                let movements = h.inventory.ledger.history(a.id, 500).await.unwrap();
                if let Some(latest) = movements.first() {
                    assert_eq!(latest.new_stock, levels.product.stock);
                }
            }
        });
    }
}
