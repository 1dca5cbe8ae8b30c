#![allow(missing_docs)] // test only
use rand::prelude::*;
use volatile_index::{GroupedIndex, PartlyRelaxedIndex, RelaxedIndex, StrictIndex};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Row {
    id: u32,
    group: Option<u32>,
    payload: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Fault {
    NullGroup(u32),
    ZeroKey,
    Probe,
    Source,
}

fn random_rows(seed: u64, len: usize, groups: u32, null_every: u32) -> Vec<Row> {
    let mut rng = rand_pcg::Pcg64::seed_from_u64(seed);
    (0..len)
        .map(|id| {
            let group = if null_every != 0 && rng.gen_range(0..null_every) == 0 {
                None
            } else {
                Some(rng.gen_range(0..groups))
            };
            Row {
                id: id as u32,
                group,
                payload: rng.gen(),
            }
        })
        .collect()
}

/// Key derivation that fails on rows without a group, like a field access through an absent
/// reference would.
fn group_key(row: &Row) -> Result<u32, Fault> {
    row.group.ok_or(Fault::NullGroup(row.id))
}

/// Total key derivation treating the absent group as a key of its own.
fn total_key(row: &Row) -> Result<Option<u32>, Fault> {
    Ok(row.group)
}

fn naive(rows: &[Row], key: Option<u32>) -> Vec<&Row> {
    rows.iter().filter(|row| row.group == key).collect()
}

#[test]
fn naive_equivalence_with_total_keys() {
    let rows = random_rows(1, 500, 13, 4);

    let relaxed = RelaxedIndex::build(rows.clone(), total_key);
    let strict = StrictIndex::build(rows.clone(), total_key);
    let partly = PartlyRelaxedIndex::build(rows.clone(), total_key);
    let grouped = GroupedIndex::build(rows.clone(), total_key);

    assert!(strict.first_failure().is_none());
    assert_eq!(partly.key_failures().count(), 0);
    assert_eq!(grouped.key_failures().count(), 0);

    for key in (0..15).map(Some).chain([None]) {
        let expected = naive(&rows, key);

        let observed: Vec<&Row> = relaxed.lookup(|| Ok::<_, Fault>(key)).collect();
        assert_eq!(observed, expected);

        let observed: Vec<&Row> = strict
            .lookup(|| Ok(key), false, false)
            .map(|item| item.unwrap())
            .collect();
        assert_eq!(observed, expected);

        let observed: Vec<&Row> = partly
            .lookup(|| Ok(key), false)
            .map(|item| item.unwrap())
            .collect();
        assert_eq!(observed, expected);

        let observed: Vec<&Row> = grouped.lookup(|| Ok(key)).map(|keyed| keyed.value()).collect();
        assert_eq!(observed, expected);
        for keyed in grouped.lookup(|| Ok(key)) {
            assert_eq!(keyed.is_valid(), Ok(true));
            assert_eq!(keyed.key(), Ok(&key));
        }
    }
}

#[test]
fn missing_keys_yield_empty_lookups() {
    let rows = random_rows(2, 100, 5, 0);

    let relaxed = RelaxedIndex::build(rows.clone(), total_key);
    let lookup = relaxed.lookup(|| Ok::<_, Fault>(Some(99)));
    assert_eq!(lookup.size_hint(), (0, Some(0)));
    assert_eq!(lookup.count(), 0);

    let strict = StrictIndex::build(rows.clone(), total_key);
    assert_eq!(strict.lookup(|| Ok(Some(99)), false, false).count(), 0);

    let partly = PartlyRelaxedIndex::build(rows.clone(), total_key);
    assert_eq!(partly.lookup(|| Ok(Some(99)), false).count(), 0);

    let grouped = GroupedIndex::build(rows.clone(), total_key);
    assert_eq!(grouped.lookup(|| Ok(Some(99))).count(), 0);
}

#[test]
fn borrowed_elements_leave_the_source_untouched() {
    let rows = random_rows(3, 200, 7, 3);
    let pristine = rows.clone();

    let index = RelaxedIndex::build(rows.iter(), |row: &&Row| total_key(*row));
    for key in (0..7).map(Some).chain([None]) {
        let observed: Vec<&Row> = index.lookup(|| Ok::<_, Fault>(key)).copied().collect();
        assert_eq!(observed, naive(&rows, key));
    }
    assert_eq!(rows, pristine);
}

#[test]
fn relaxed_drops_failing_elements() {
    let rows = random_rows(4, 300, 9, 3);
    let index = RelaxedIndex::build(rows.clone(), group_key);

    let nulls = rows.iter().filter(|row| row.group.is_none()).count();
    assert_eq!(index.len(), rows.len() - nulls);

    for key in 0..9 {
        let observed: Vec<&Row> = index.lookup(|| Ok::<_, Fault>(key)).collect();
        assert_eq!(observed, naive(&rows, Some(key)));
    }

    // A failing probe is a miss, not a failure.
    assert_eq!(index.lookup(|| Err::<u32, _>(Fault::Probe)).count(), 0);
}

#[test]
fn relaxed_source_failure_keeps_the_prefix() {
    let rows = vec![
        Row { id: 0, group: Some(1), payload: 0 },
        Row { id: 1, group: None, payload: 0 },
        Row { id: 2, group: Some(1), payload: 0 },
        Row { id: 3, group: Some(1), payload: 0 },
    ];
    let source = rows[..3]
        .iter()
        .copied()
        .map(Ok)
        .chain([Err(Fault::Source)])
        .chain(rows[3..].iter().copied().map(Ok));
    let index = RelaxedIndex::build_fallible(source, group_key);

    // Rows 0 and 2 are keyed, row 1 fails key derivation, row 3 is past the source failure.
    assert_eq!(index.len(), 2);
    assert_eq!(
        index
            .lookup(|| Ok::<_, Fault>(1))
            .map(|row| row.id)
            .collect::<Vec<_>>(),
        [0, 2]
    );
}

#[test]
fn strict_probe_failure_over_empty_source_is_a_miss() {
    let index = StrictIndex::build(Vec::<Row>::new(), group_key);
    assert_eq!(index.lookup(|| Err::<u32, _>(Fault::Probe), false, false).count(), 0);
    assert_eq!(index.lookup(|| Err::<u32, _>(Fault::Probe), true, false).count(), 0);
}

#[test]
fn strict_probe_failure_over_nonempty_source_is_raised() {
    let rows = random_rows(5, 10, 3, 0);
    let index = StrictIndex::build(rows, group_key);

    let observed: Vec<_> = index.lookup(|| Err::<u32, _>(Fault::Probe), false, false).collect();
    assert_eq!(observed, [Err(Fault::Probe)]);

    // The first element's key derivation succeeds, so the probe failure still wins under
    // key-first ordering.
    let observed: Vec<_> = index.lookup(|| Err::<u32, _>(Fault::Probe), true, false).collect();
    assert_eq!(observed, [Err(Fault::Probe)]);
}

#[test]
fn strict_key_derivation_of_first_element_takes_precedence() {
    let rows = vec![
        Row { id: 7, group: None, payload: 0 },
        Row { id: 8, group: Some(1), payload: 0 },
    ];
    let index = StrictIndex::build(rows, group_key);

    let observed: Vec<_> = index.lookup(|| Err::<u32, _>(Fault::Probe), true, false).collect();
    assert_eq!(observed, [Err(Fault::NullGroup(7))]);

    let observed: Vec<_> = index.lookup(|| Err::<u32, _>(Fault::Probe), false, false).collect();
    assert_eq!(observed, [Err(Fault::Probe)]);
}

#[test]
fn strict_partial_index_fails_on_the_final_advance() {
    let rows = vec![
        Row { id: 0, group: Some(1), payload: 0 },
        Row { id: 1, group: Some(2), payload: 0 },
        Row { id: 2, group: None, payload: 0 },
        Row { id: 3, group: Some(1), payload: 0 },
        Row { id: 4, group: Some(1), payload: 0 },
    ];
    let index = StrictIndex::build(rows.clone(), group_key);

    // Only the prefix in front of the failing element is indexed.
    assert_eq!(index.len(), 2);
    assert_eq!(index.first_failure(), Some(&Fault::NullGroup(2)));

    let mut lookup = index.lookup(|| Ok(1), false, false);
    assert_eq!(lookup.len(), 2);
    assert_eq!(lookup.next(), Some(Ok(&rows[0])));
    assert_eq!(lookup.next(), Some(Err(Fault::NullGroup(2))));
    assert_eq!(lookup.next(), None);

    // Misses still surface the recorded failure on their first (and final) advance.
    let observed: Vec<_> = index.lookup(|| Ok(99), false, false).collect();
    assert_eq!(observed, [Err(Fault::NullGroup(2))]);
}

#[test]
fn strict_source_failure_is_recorded() {
    let rows = vec![Row { id: 0, group: Some(1), payload: 0 }];
    let source = rows.iter().copied().map(Ok).chain([Err(Fault::Source)]);
    let index = StrictIndex::build_fallible(source, group_key);

    assert_eq!(index.len(), 1);
    let observed: Vec<_> = index.lookup(|| Ok(1), false, false).collect();
    assert_eq!(observed, [Ok(&rows[0]), Err(Fault::Source)]);

    // A source that fails on its very first advance is not an empty source: under key-first
    // ordering its failure takes precedence over the probe failure.
    let index = StrictIndex::build_fallible(std::iter::once(Err::<Row, _>(Fault::Source)), group_key);
    assert!(index.is_empty());
    let observed: Vec<_> = index.lookup(|| Err::<u32, _>(Fault::Probe), true, false).collect();
    assert_eq!(observed, [Err(Fault::Source)]);
    let observed: Vec<_> = index.lookup(|| Err::<u32, _>(Fault::Probe), false, false).collect();
    assert_eq!(observed, [Err(Fault::Probe)]);
}

#[test]
fn strict_key_guard() {
    let rows = vec![
        Row { id: 0, group: Some(1), payload: 0 },
        Row { id: 1, group: Some(0), payload: 0 },
        Row { id: 2, group: Some(2), payload: 0 },
    ];
    let guard = |key: &u32| if *key == 0 { Err(Fault::ZeroKey) } else { Ok(()) };

    // Guarding source keys halts the build at the offending element.
    let index = StrictIndex::build_guarded(rows.clone(), group_key, guard, true);
    assert_eq!(index.len(), 1);
    assert_eq!(index.first_failure(), Some(&Fault::ZeroKey));

    // Without the build flag all keys are indexed and only guarded probes fail.
    let index = StrictIndex::build_guarded(rows.clone(), group_key, guard, false);
    assert_eq!(index.len(), 3);
    let observed: Vec<_> = index.lookup(|| Ok(0), false, true).collect();
    assert_eq!(observed, [Err(Fault::ZeroKey)]);
    let observed: Vec<_> = index.lookup(|| Ok(0), false, false).collect();
    assert_eq!(observed, [Ok(&rows[1])]);
}

#[test]
fn partly_relaxed_raises_reachable_failures_before_results() {
    let rows = vec![
        Row { id: 0, group: Some(1), payload: 0 },
        Row { id: 1, group: None, payload: 0 },
        Row { id: 2, group: Some(1), payload: 0 },
        Row { id: 3, group: None, payload: 0 },
    ];
    let index = PartlyRelaxedIndex::build(rows.clone(), group_key);

    assert_eq!(index.len(), 2);
    assert_eq!(
        index.key_failures().map(|(row, _)| row.id).collect::<Vec<_>>(),
        [1, 3]
    );

    // Without a residual the first recorded failure is raised on every lookup.
    let observed: Vec<_> = index.lookup(|| Ok(1), false).collect();
    assert_eq!(observed, [Err(Fault::NullGroup(1))]);
    let observed: Vec<_> = index.lookup(|| Ok(99), false).collect();
    assert_eq!(observed, [Err(Fault::NullGroup(1))]);

    // A residual that excludes the failing elements unblocks the bucket.
    let observed: Vec<_> = index
        .lookup_filtered(|| Ok(1), false, |row: &Row| row.group.is_some())
        .collect();
    assert_eq!(observed, [Ok(&rows[0]), Ok(&rows[2])]);

    // A residual reaching any failing element raises the first such failure.
    let observed: Vec<_> = index
        .lookup_filtered(|| Ok(1), false, |row: &Row| row.id >= 3)
        .collect();
    assert_eq!(observed, [Err(Fault::NullGroup(3))]);
}

#[test]
fn partly_relaxed_residual_filters_results() {
    let rows = random_rows(6, 400, 6, 0);
    let index = PartlyRelaxedIndex::build(rows.clone(), group_key);

    for key in 0..6 {
        let expected: Vec<&Row> = rows
            .iter()
            .filter(|row| row.group == Some(key) && row.payload % 2 == 0)
            .collect();
        let observed: Vec<&Row> = index
            .lookup_filtered(|| Ok(key), false, |row: &Row| row.payload % 2 == 0)
            .map(|item| item.unwrap())
            .collect();
        assert_eq!(observed, expected);
    }
}

#[test]
fn partly_relaxed_probe_failure_needs_a_witness() {
    let rows = vec![
        Row { id: 0, group: None, payload: 0 },
        Row { id: 1, group: Some(1), payload: 0 },
    ];
    let index = PartlyRelaxedIndex::build(rows, group_key);

    // Probe failure over an empty source is a miss.
    let empty = PartlyRelaxedIndex::build(Vec::<Row>::new(), group_key);
    assert_eq!(empty.lookup(|| Err::<u32, _>(Fault::Probe), false).count(), 0);

    // Without a residual the first element witnesses the probe failure; under key-first
    // ordering its own key failure wins.
    let observed: Vec<_> = index.lookup(|| Err::<u32, _>(Fault::Probe), true).collect();
    assert_eq!(observed, [Err(Fault::NullGroup(0))]);
    let observed: Vec<_> = index.lookup(|| Err::<u32, _>(Fault::Probe), false).collect();
    assert_eq!(observed, [Err(Fault::Probe)]);

    // The residual picks the witness; a keyable witness lets the probe failure through.
    let observed: Vec<_> = index
        .lookup_filtered(|| Err::<u32, _>(Fault::Probe), true, |row: &Row| row.id == 1)
        .collect();
    assert_eq!(observed, [Err(Fault::Probe)]);

    // No witness at all: the scan would have visited nothing, so the lookup is a miss.
    let observed: Vec<_> = index
        .lookup_filtered(|| Err::<u32, _>(Fault::Probe), true, |row: &Row| row.id > 9)
        .collect();
    assert_eq!(observed, Vec::<Result<&Row, Fault>>::new());
}

#[test]
fn partly_relaxed_source_failure_surfaces() {
    let source = [
        Ok(Row { id: 0, group: Some(1), payload: 0 }),
        Err(Fault::Source),
    ];
    assert!(matches!(
        PartlyRelaxedIndex::build_fallible(source, group_key),
        Err(Fault::Source)
    ));
    assert!(matches!(
        GroupedIndex::build_fallible(source, group_key),
        Err(Fault::Source)
    ));
}

#[test]
fn grouped_lookup_yields_matches_then_failures() {
    let rows = vec![
        Row { id: 0, group: Some(1), payload: 10 },
        Row { id: 1, group: None, payload: 20 },
        Row { id: 2, group: Some(1), payload: 30 },
    ];
    let index = GroupedIndex::build(rows.clone(), group_key);

    assert_eq!(index.len(), 2);
    assert_eq!(index.key_failures().count(), 1);

    let observed: Vec<_> = index.lookup(|| Ok(1)).collect();
    assert_eq!(observed.len(), 3);
    assert_eq!(observed[0].value(), &rows[0]);
    assert_eq!(observed[0].is_valid(), Ok(true));
    assert_eq!(observed[0].key(), Ok(&1));
    assert_eq!(observed[1].value(), &rows[2]);
    assert_eq!(observed[1].is_valid(), Ok(true));
    assert_eq!(observed[2].value(), &rows[1]);
    assert_eq!(observed[2].is_valid(), Err(Fault::NullGroup(1)));
    assert_eq!(observed[2].key(), Err(Fault::NullGroup(1)));

    // A miss yields nothing, not even the failing elements.
    assert_eq!(index.lookup(|| Ok(9)).count(), 0);
}

#[test]
fn grouped_probe_failure_wraps_the_whole_source() {
    let rows = random_rows(7, 50, 4, 3);
    let index = GroupedIndex::build(rows.clone(), group_key);

    let observed: Vec<_> = index.lookup(|| Err::<u32, _>(Fault::Probe)).collect();
    assert_eq!(observed.len(), rows.len());
    for (keyed, row) in observed.iter().zip(rows.iter()) {
        assert_eq!(keyed.value(), row);
        assert_eq!(keyed.is_valid(), Err(Fault::Probe));
    }
}

#[test]
fn grouped_randomized_equivalence() {
    let rows = random_rows(8, 600, 11, 5);
    let index = GroupedIndex::build(rows.clone(), group_key);

    let nulls: Vec<&Row> = rows.iter().filter(|row| row.group.is_none()).collect();
    assert_eq!(index.len() + nulls.len(), rows.len());

    for key in 0..13 {
        let matches = naive(&rows, Some(key));
        let observed: Vec<_> = index.lookup(|| Ok(key)).collect();
        if matches.is_empty() {
            assert_eq!(observed.len(), 0);
            continue;
        }
        assert_eq!(observed.len(), matches.len() + nulls.len());
        for (keyed, expected) in observed.iter().zip(matches.iter().chain(nulls.iter())) {
            assert_eq!(keyed.value(), *expected);
        }
        for keyed in &observed[..matches.len()] {
            assert_eq!(keyed.is_valid(), Ok(true));
        }
        for keyed in &observed[matches.len()..] {
            assert!(keyed.is_valid().is_err());
        }
    }
}
