use super::*;

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::hash::Hasher;

use proptest::prelude::*;
use siphasher::sip::SipHasher;

#[derive(Debug, Clone)]
enum Op {
    Put(u32, u32),
    Remove(u32),
    Get(u32),
}

type SipTable = RobinHoodTable<fn(&[u8]) -> u64>;

fn sip(key: &[u8]) -> u64 {
    let mut h = SipHasher::new_with_keys(0x5151, 0xa5a5);
    h.write(key);
    h.finish()
}

fn sip_table(expected: u64, load_factor: f64) -> SipTable {
    RobinHoodTable::with_hasher(expected, load_factor, 4, 4, sip as fn(&[u8]) -> u64).unwrap()
}

fn validate_table(table: &SipTable, model: &BTreeMap<u32, u32>) {
    assert_eq!(table.len(), model.len());
    assert_eq!(table.stats().total(), model.len() as u64, "{}", table.stats());

    for (key, value) in model {
        let key = key.to_le_bytes();
        assert_eq!(table.get(&key), Some(&value.to_le_bytes()[..]));
        let probes = table
            .probe_count(&key)
            .expect("live key must be reachable");
        assert!(probes <= table.longest_probes(), "{probes} > {table:?}");
    }
}

fn ops_strategy() -> impl Strategy<Value = Vec<Op>> {
    // A narrow key domain so that overwrites and removals hit live keys.
    let key = 0u32..96;
    let op = prop_oneof![
        50 => (key.clone(), any::<u32>()).prop_map(|(k, v)| Op::Put(k, v)),
        20 => key.clone().prop_map(Op::Remove),
        30 => key.prop_map(Op::Get),
    ];
    prop::collection::vec(op, 0..=1000)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 10_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_matches_btree_model(ops in ops_strategy()) {
        let mut table = sip_table(256, 0.5);
        let mut model = BTreeMap::new();

        for op in ops {
            match op {
                Op::Put(key, value) => {
                    table.put(&key.to_le_bytes(), &value.to_le_bytes()).unwrap();
                    model.insert(key, value);
                }
                Op::Remove(key) => {
                    prop_assert_eq!(table.remove(&key.to_le_bytes()), model.remove(&key).is_some());
                }
                Op::Get(key) => {
                    let got = table.get(&key.to_le_bytes()).map(<[u8]>::to_vec);
                    let expected = model.get(&key).map(|v| v.to_le_bytes().to_vec());
                    prop_assert_eq!(got, expected);
                }
            }
            prop_assert_eq!(table.len(), model.len());
        }

        validate_table(&table, &model);
    }

    #[test]
    fn prop_last_write_wins(key in any::<u32>(), first in any::<u32>(), second in any::<u32>()) {
        let mut table = sip_table(16, 0.5);
        table.put(&key.to_le_bytes(), &first.to_le_bytes()).unwrap();
        table.put(&key.to_le_bytes(), &second.to_le_bytes()).unwrap();

        prop_assert_eq!(table.len(), 1);
        prop_assert_eq!(table.get(&key.to_le_bytes()), Some(&second.to_le_bytes()[..]));
    }

    #[test]
    fn prop_refusals_leave_table_intact(expected in 1u64..200, load_factor in 0.3f64..0.95) {
        let mut table = sip_table(expected, load_factor);
        let mut model = BTreeMap::new();

        for key in 0u32.. {
            let len = table.len();
            match table.put(&key.to_le_bytes(), &key.to_le_bytes()) {
                Ok(()) => {
                    model.insert(key, key);
                }
                Err(Error::CapacityExhausted) => {
                    prop_assert_eq!(len, table.high_water_mark());
                    prop_assert_eq!(table.len(), len);
                    break;
                }
                Err(Error::ProbeSequenceExhausted) => {
                    prop_assert!(len < table.high_water_mark());
                    prop_assert_eq!(table.len(), len);
                    break;
                }
                Err(err) => prop_assert!(false, "unexpected {err}"),
            }
        }

        validate_table(&table, &model);
    }

    #[test]
    fn prop_funnel_matches_direct_puts(
        puts in prop::collection::vec((0u32..400, any::<u32>()), 0..=600),
        lookups in prop::collection::vec(0u32..500, 0..=300),
        slot_size in 1usize..512,
        partition_size in 1usize..2048,
    ) {
        let config = FunnelConfig::default()
            .with_slot_size(slot_size)
            .with_partition_size(partition_size);

        let mut direct = sip_table(1000, 0.5);
        for &(key, value) in &puts {
            direct.put(&key.to_le_bytes(), &value.to_le_bytes()).unwrap();
        }

        let mut funneled = sip_table(1000, 0.5);
        let mut funnel = Funnel::new(&mut funneled, config);
        for &(key, value) in &puts {
            funnel.insert(&key.to_le_bytes(), &value.to_le_bytes()).unwrap();
        }
        prop_assert_eq!(funnel.insert_flush(), Ok(()));
        drop(funnel);

        let mut model = BTreeMap::new();
        for &(key, value) in &puts {
            model.insert(key, value);
        }
        validate_table(&funneled, &model);
        validate_table(&direct, &model);

        let mut delivered = Vec::new();
        let mut funnel = Funnel::with_callback(
            &mut funneled,
            |key: &[u8], value: Option<&[u8]>, index: usize| {
                delivered.push((index, key.to_vec(), value.map(<[u8]>::to_vec)));
            },
            config,
        );
        for (index, key) in lookups.iter().enumerate() {
            funnel.get(&key.to_le_bytes(), index).unwrap();
        }
        funnel.get_flush();
        drop(funnel);

        delivered.sort_by_key(|(index, _, _)| *index);
        prop_assert_eq!(delivered.len(), lookups.len());
        for ((index, key, value), (expected_index, expected_key)) in
            delivered.into_iter().zip(lookups.iter().enumerate())
        {
            prop_assert_eq!(index, expected_index);
            prop_assert_eq!(&key[..], &expected_key.to_le_bytes()[..]);
            prop_assert_eq!(value.as_deref(), direct.get(&key));
        }
    }
}
