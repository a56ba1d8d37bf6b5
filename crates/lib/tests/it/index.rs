use std::collections::BTreeMap;

use rand::{Rng, SeedableRng, rngs::StdRng};
use sprig::address::{self, Address};
use sprig::index::{Keyed, OrderedIndex};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Item {
    address: Address,
    serial: u32,
}

impl Keyed for Item {
    fn key(&self) -> &Address {
        &self.address
    }
}

/// Picks a random gap and returns a fresh address inside it.
fn random_gap(index: &OrderedIndex<Item>, rng: &mut StdRng) -> Address {
    let rank = rng.gen_range(0..=index.len());
    let before = rank
        .checked_sub(1)
        .and_then(|r| index.get_at(r))
        .map(|item| &item.address);
    let after = index.get_at(rank).map(|item| &item.address);
    address::between(before, after).unwrap()
}

fn assert_matches_model(index: &OrderedIndex<Item>, model: &BTreeMap<Address, u32>) {
    assert_eq!(index.len(), model.len());
    let actual: Vec<_> = index.iter().map(|item| (&item.address, item.serial)).collect();
    let expected: Vec<_> = model.iter().map(|(a, s)| (a, *s)).collect();
    assert_eq!(actual, expected);
    for rank in 0..index.len() {
        let item = index.get_at(rank).unwrap();
        assert_eq!(index.rank_of(&item.address), Some(rank));
    }
}

#[test]
fn randomized_operations_keep_tree_valid() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut index: OrderedIndex<Item> = OrderedIndex::new();
    let mut model = BTreeMap::new();

    for serial in 0..2_000u32 {
        let remove = !index.is_empty() && rng.gen_bool(0.35);
        if remove {
            let rank = rng.gen_range(0..index.len());
            let address = index.get_at(rank).unwrap().address.clone();
            let removed = index.remove(&address).unwrap();
            assert_eq!(model.remove(&address), Some(removed.serial));
        } else {
            let address = random_gap(&index, &mut rng);
            assert!(!model.contains_key(&address));
            let previous = index.insert(Item {
                address: address.clone(),
                serial,
            });
            assert!(previous.is_none());
            model.insert(address, serial);
        }

        index.validate().unwrap_or_else(|e| panic!("after op {serial}: {e}"));
        if serial % 100 == 0 {
            assert_matches_model(&index, &model);
        }
    }
    assert_matches_model(&index, &model);
}

#[test]
fn removing_everything_in_random_order() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut index = OrderedIndex::new();
    for serial in 0..1_000u32 {
        let address = random_gap(&index, &mut rng);
        index.insert(Item { address, serial });
    }
    index.validate().unwrap();

    while !index.is_empty() {
        let rank = rng.gen_range(0..index.len());
        let address = index.get_at(rank).unwrap().address.clone();
        index.remove(&address).unwrap();
        index.validate().unwrap();
        assert!(index.get(&address).is_none());
    }
    assert!(index.first().is_none());
}

#[test]
fn snapshot_survives_heavy_mutation() {
    let mut rng = StdRng::seed_from_u64(42);
    let mut index = OrderedIndex::new();
    for serial in 0..300u32 {
        let address = random_gap(&index, &mut rng);
        index.insert(Item { address, serial });
    }
    let snapshot = index.snapshot();
    let frozen: Vec<_> = snapshot.iter().cloned().collect();

    for serial in 300..600u32 {
        if !index.is_empty() && rng.gen_bool(0.5) {
            let rank = rng.gen_range(0..index.len());
            let address = index.get_at(rank).unwrap().address.clone();
            index.remove(&address);
        } else {
            let address = random_gap(&index, &mut rng);
            index.insert(Item { address, serial });
        }
    }

    let after: Vec<_> = snapshot.iter().cloned().collect();
    assert_eq!(after, frozen);
    assert_eq!(snapshot.len(), 300);
    // Iteration is restartable.
    assert_eq!(snapshot.iter().count(), (&snapshot).into_iter().count());
}

#[test]
fn neighbours_and_ends() {
    let mut index = OrderedIndex::new();
    for (serial, byte) in [0x20u8, 0x40, 0x60].into_iter().enumerate() {
        index.insert(Item {
            address: Address::from_bytes(vec![byte]),
            serial: serial as u32,
        });
    }
    let key = Address::from_bytes(vec![0x40]);
    assert_eq!(index.before(&key).unwrap().serial, 0);
    assert_eq!(index.after(&key).unwrap().serial, 2);

    let absent = Address::from_bytes(vec![0x50]);
    assert_eq!(index.before(&absent).unwrap().serial, 1);
    assert_eq!(index.after(&absent).unwrap().serial, 2);

    assert_eq!(index.first().unwrap().serial, 0);
    assert_eq!(index.last().unwrap().serial, 2);
    assert!(index.before(&Address::from_bytes(vec![0x20])).is_none());
    assert_eq!(index.rank_of(&absent), None);
}
