//! Property tests for the library's core invariants.
//!
//! These check the contracts that must hold for arbitrary inputs: view
//! consistency of the SDR container, bounds and containment of learned
//! permanences, shape and ordering of the pooler's output, and determinism
//! under a fixed seed.
//!
//! Run with: `cargo test --test sp_properties`

use proptest::prelude::*;
use veles::prelude::*;

// =============================================================================
// SDR PROPERTIES
// =============================================================================

mod sdr_properties {
    use super::*;

    /// Strategy producing a size and a valid ascending sparse vector for it.
    fn sized_sparse() -> impl Strategy<Value = (u32, Vec<u32>)> {
        (16u32..256).prop_flat_map(|size| {
            (
                Just(size),
                proptest::collection::btree_set(0..size, 0..=size as usize / 2)
                    .prop_map(|set| set.into_iter().collect::<Vec<u32>>()),
            )
        })
    }

    proptest! {
        #[test]
        fn views_are_mutually_consistent((size, sparse) in sized_sparse()) {
            let mut sdr = Sdr::new(&[size]).unwrap();
            sdr.set_sparse(&sparse).unwrap();

            let dense = sdr.get_dense().unwrap();
            let coords = sdr.get_coordinates().unwrap();

            // Cardinality agrees across views.
            prop_assert_eq!(sdr.get_sum().unwrap(), sparse.len());
            prop_assert_eq!(dense.iter().filter(|&&b| b != 0).count(), sparse.len());
            prop_assert_eq!(coords[0].len(), sparse.len());

            // Every sparse index is set in the dense view and vice versa.
            for &idx in &sparse {
                prop_assert_eq!(dense[idx as usize], 1);
            }
            prop_assert_eq!(&coords[0], &sparse);
        }

        #[test]
        fn dense_roundtrip((size, sparse) in sized_sparse()) {
            let mut dense = vec![0u8; size as usize];
            for &idx in &sparse {
                dense[idx as usize] = 1;
            }

            let mut sdr = Sdr::new(&[size]).unwrap();
            sdr.set_dense(&dense).unwrap();
            prop_assert_eq!(sdr.get_dense().unwrap(), dense);
            prop_assert_eq!(sdr.get_sparse().unwrap(), sparse);
        }

        #[test]
        fn save_load_roundtrip((size, sparse) in sized_sparse()) {
            let mut sdr = Sdr::new(&[size]).unwrap();
            sdr.set_sparse(&sparse).unwrap();

            let mut buffer = Vec::new();
            sdr.save(&mut buffer).unwrap();
            let restored = Sdr::load(&mut std::io::Cursor::new(buffer)).unwrap();
            prop_assert_eq!(sdr, restored);
        }

        #[test]
        fn randomize_hits_requested_cardinality(
            size in 64u32..512,
            sparsity in 0.0f32..=0.5,
            seed in 1u64..1000,
        ) {
            let mut rng = Random::new(seed);
            let mut sdr = Sdr::new(&[size]).unwrap();
            sdr.randomize(sparsity, &mut rng).unwrap();

            let expected = (sparsity as f64 * size as f64).round() as usize;
            prop_assert_eq!(sdr.get_sum().unwrap(), expected);
        }

        #[test]
        fn add_noise_preserves_cardinality(
            fraction in 0.0f32..=1.0,
            seed in 1u64..1000,
        ) {
            let mut rng = Random::new(seed);
            let mut sdr = Sdr::new(&[256]).unwrap();
            sdr.randomize(0.2, &mut rng).unwrap();
            let before = sdr.get_sum().unwrap();

            sdr.add_noise(fraction, &mut rng).unwrap();
            prop_assert_eq!(sdr.get_sum().unwrap(), before);
        }
    }
}

// =============================================================================
// RNG PROPERTIES
// =============================================================================

mod rng_properties {
    use super::*;

    proptest! {
        #[test]
        fn sample_returns_distinct_members(
            seed in 1u64..1000,
            n in 1usize..200,
        ) {
            let mut rng = Random::new(seed);
            let items: Vec<u32> = (0..n as u32).collect();
            let k = n / 2;
            let sampled = rng.sample(&items, k).unwrap();

            prop_assert_eq!(sampled.len(), k);
            let mut unique = sampled.clone();
            unique.sort_unstable();
            unique.dedup();
            prop_assert_eq!(unique.len(), k);
            for &item in &sampled {
                prop_assert!(item < n as u32);
            }
        }

        #[test]
        fn equal_seeds_equal_streams(seed in 1u64..10_000) {
            let mut a = Random::new(seed);
            let mut b = Random::new(seed);
            for _ in 0..32 {
                prop_assert_eq!(a.uint32(), b.uint32());
            }
            prop_assert_eq!(a, b);
        }
    }
}

// =============================================================================
// SPATIAL POOLER PROPERTIES
// =============================================================================

mod sp_invariants {
    use super::*;

    fn pooler(seed: u64) -> SpatialPooler {
        SpatialPooler::new(SpatialPoolerParams {
            input_dimensions: vec![64],
            column_dimensions: vec![128],
            potential_radius: 32,
            potential_pct: 0.5,
            global_inhibition: true,
            local_area_density: 0.0,
            num_active_columns_per_inh_area: 8,
            stimulus_threshold: 1,
            syn_perm_inactive_dec: 0.01,
            syn_perm_active_inc: 0.1,
            syn_perm_connected: 0.2,
            boost_strength: 2.0,
            seed,
            ..Default::default()
        })
        .unwrap()
    }

    proptest! {
        // Learning is slow; keep the case count moderate.
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn active_columns_are_ascending_and_bounded(
            seed in 1u64..500,
            input_seed in 1u64..500,
        ) {
            let mut sp = pooler(seed);
            let mut rng = Random::new(input_seed);
            let mut input = Sdr::new(&[64]).unwrap();
            let mut active = Sdr::new(&[128]).unwrap();

            for _ in 0..20 {
                input.randomize(0.15, &mut rng).unwrap();
                let overlaps = sp.compute(&input, true, &mut active).unwrap();
                prop_assert_eq!(overlaps.len(), 128);

                let sparse = active.get_sparse().unwrap();
                let mut sorted = sparse.clone();
                sorted.sort_unstable();
                sorted.dedup();
                prop_assert_eq!(&sparse, &sorted);

                // Global inhibition with density 8/128 selects at most 8;
                // sub-threshold trimming may drop below that.
                prop_assert!(sparse.len() <= 8);
            }
        }

        #[test]
        fn permanences_stay_bounded_and_in_pool(
            seed in 1u64..500,
            input_seed in 1u64..500,
        ) {
            let mut sp = pooler(seed);
            let pools: Vec<Vec<u32>> =
                (0..128).map(|column| sp.get_potential(column)).collect();

            let mut rng = Random::new(input_seed);
            let mut input = Sdr::new(&[64]).unwrap();
            let mut active = Sdr::new(&[128]).unwrap();
            for _ in 0..30 {
                input.randomize(0.2, &mut rng).unwrap();
                sp.compute(&input, true, &mut active).unwrap();
            }

            for column in 0..128u32 {
                let pool = &pools[column as usize];
                let synapses = sp.connections().synapses_for_segment(column);
                prop_assert!(synapses.len() <= pool.len());
                for &synapse in synapses {
                    let data = sp.connections().data_for_synapse(synapse);
                    prop_assert!(data.permanence >= MIN_PERMANENCE);
                    prop_assert!(data.permanence <= MAX_PERMANENCE);
                    prop_assert!(pool.contains(&data.presynaptic_cell));
                }
            }
        }

        #[test]
        fn fixed_seed_is_fully_deterministic(
            seed in 1u64..500,
            input_seed in 1u64..500,
        ) {
            let mut a = pooler(seed);
            let mut b = pooler(seed);

            let mut rng = Random::new(input_seed);
            let mut input = Sdr::new(&[64]).unwrap();
            let mut active_a = Sdr::new(&[128]).unwrap();
            let mut active_b = Sdr::new(&[128]).unwrap();

            for _ in 0..15 {
                input.randomize(0.15, &mut rng).unwrap();
                let overlaps_a = a.compute(&input, true, &mut active_a).unwrap();
                let overlaps_b = b.compute(&input, true, &mut active_b).unwrap();
                prop_assert_eq!(overlaps_a, overlaps_b);
                prop_assert_eq!(&active_a, &active_b);
            }
            prop_assert!(a == b);
        }
    }

    /// Overlapping inputs must keep overlapping outputs after training
    /// (the representation is noise tolerant). Boosting is off so the
    /// winner set is stable between the training and evaluation calls.
    #[test]
    fn similar_inputs_give_overlapping_outputs() {
        let mut sp = SpatialPooler::new(SpatialPoolerParams {
            input_dimensions: vec![64],
            column_dimensions: vec![128],
            potential_radius: 32,
            potential_pct: 0.5,
            global_inhibition: true,
            local_area_density: 0.0,
            num_active_columns_per_inh_area: 8,
            stimulus_threshold: 1,
            syn_perm_inactive_dec: 0.01,
            syn_perm_active_inc: 0.1,
            syn_perm_connected: 0.2,
            boost_strength: 0.0,
            seed: 7,
            ..Default::default()
        })
        .unwrap();
        let mut rng = Random::new(13);

        let mut input = Sdr::new(&[64]).unwrap();
        input.randomize(0.25, &mut rng).unwrap();
        let mut active = Sdr::new(&[128]).unwrap();

        for _ in 0..40 {
            sp.compute(&input, true, &mut active).unwrap();
        }
        let trained = active.clone();

        let mut noised = input.clone();
        noised.add_noise(0.2, &mut rng).unwrap();
        let mut active_noised = Sdr::new(&[128]).unwrap();
        sp.compute(&noised, false, &mut active_noised).unwrap();

        let overlap = trained.get_overlap(&active_noised).unwrap();
        assert!(
            overlap * 2 >= trained.get_sum().unwrap(),
            "noised input lost too much of the representation: {overlap}"
        );
    }
}
