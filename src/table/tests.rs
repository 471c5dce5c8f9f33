#[cfg(test)]
mod tests {
    use crate::table::store::{PatchOutcome, TableStore};
    use crate::table::types::{
        FieldType, FieldValue, Id, Revision, TableDescriptor, TableKind,
    };
    use crate::time::LogicalTime;

    fn descriptor() -> TableDescriptor {
        TableDescriptor::new("test_table")
            .add_field("value", FieldType::Int)
            .add_field("label", FieldType::Text)
    }

    fn store(kind: TableKind) -> TableStore {
        TableStore::new(kind, descriptor(), false)
    }

    fn revision(value: i64) -> Revision {
        let mut revision = Revision::from_template(&descriptor());
        revision.set("value", FieldValue::Int(value)).unwrap();
        revision
    }

    // ============================================================
    // REVISION & TEMPLATE
    // ============================================================

    #[test]
    fn template_presets_declared_fields() {
        let revision = Revision::from_template(&descriptor());
        assert_eq!(revision.get("value"), Some(&FieldValue::Int(0)));
        assert_eq!(
            revision.get("label"),
            Some(&FieldValue::Text(String::new()))
        );
        assert!(revision.structure_match(&descriptor()));
    }

    #[test]
    fn structure_mismatch_is_detected() {
        let other = TableDescriptor::new("other").add_field("value", FieldType::Int);
        let revision = Revision::from_template(&other);
        assert!(!revision.structure_match(&descriptor()));
    }

    #[test]
    fn set_rejects_wrong_type_and_unknown_field() {
        let mut revision = Revision::from_template(&descriptor());
        assert!(revision.set("value", FieldValue::Text("x".into())).is_err());
        assert!(revision.set("missing", FieldValue::Int(1)).is_err());
        assert!(revision.set("value", FieldValue::Int(7)).is_ok());
    }

    #[test]
    #[should_panic(expected = "reserved")]
    fn reserved_field_names_are_rejected() {
        let _ = TableDescriptor::new("bad").add_field("update_time", FieldType::Time);
    }

    #[test]
    fn id_hex_roundtrip() {
        let id = Id::generate();
        assert_eq!(id.hex().len(), 32);
        let parsed = Id::from_hex(id.hex()).unwrap();
        assert_eq!(id, parsed);
        assert!(Id::from_hex("not-hex").is_err());
    }

    // ============================================================
    // STORE: CR
    // ============================================================

    #[test]
    fn insert_and_get_roundtrip() {
        let store = store(TableKind::Cr);
        let mut revision = revision(42);
        let id = revision.id.clone();
        store.insert(LogicalTime(5), &mut revision).unwrap();

        let found = store.get_by_id(&id, LogicalTime(10)).unwrap();
        assert_eq!(found.get("value"), Some(&FieldValue::Int(42)));
        assert_eq!(found.insert_time, LogicalTime(5));
        // The item did not exist before its insert time.
        assert!(store.get_by_id(&id, LogicalTime(4)).is_none());
    }

    #[test]
    fn insert_id_collision_fails_cleanly() {
        let store = store(TableKind::Cr);
        let mut first = revision(1);
        store.insert(LogicalTime(1), &mut first).unwrap();

        let mut duplicate = revision(2);
        duplicate.set_id(first.id.clone());
        assert!(store.insert(LogicalTime(2), &mut duplicate).is_err());
        assert_eq!(store.count(LogicalTime(10)), 1);
    }

    #[test]
    fn cr_table_rejects_update() {
        let store = store(TableKind::Cr);
        let mut revision = revision(1);
        store.insert(LogicalTime(1), &mut revision).unwrap();
        assert!(store.update(LogicalTime(2), &mut revision).is_err());
    }

    // ============================================================
    // STORE: CRU
    // ============================================================

    #[test]
    fn update_times_are_strictly_increasing() {
        let store = store(TableKind::Cru);
        let mut revision = revision(42);
        let id = revision.id.clone();
        store.insert(LogicalTime(1), &mut revision).unwrap();

        revision.set("value", FieldValue::Int(21)).unwrap();
        store.update(LogicalTime(3), &mut revision).unwrap();

        // Same and older times are stale.
        assert!(store.update(LogicalTime(3), &mut revision).is_err());
        assert!(store.update(LogicalTime(2), &mut revision).is_err());

        let history = store.history(&id);
        assert_eq!(history.len(), 2);
        assert!(history[0].update_time > history[1].update_time);
    }

    #[test]
    fn get_by_id_travels_in_time() {
        let store = store(TableKind::Cru);
        let mut revision = revision(1);
        let id = revision.id.clone();
        store.insert(LogicalTime(1), &mut revision).unwrap();
        for (time, value) in [(3u64, 2i64), (5, 3), (7, 4)] {
            revision.set("value", FieldValue::Int(value)).unwrap();
            store.update(LogicalTime(time), &mut revision).unwrap();
        }

        let at = |time: u64| {
            let found = store.get_by_id(&id, LogicalTime(time)).unwrap();
            match found.get("value") {
                Some(FieldValue::Int(n)) => *n,
                _ => unreachable!(),
            }
        };
        assert_eq!(at(1), 1);
        assert_eq!(at(2), 1);
        assert_eq!(at(3), 2);
        assert_eq!(at(6), 3);
        assert_eq!(at(100), 4);
    }

    #[test]
    fn update_of_unknown_id_fails() {
        let store = store(TableKind::Cru);
        let mut revision = revision(1);
        assert!(store.update(LogicalTime(1), &mut revision).is_err());
    }

    #[test]
    fn linked_cru_chains_revisions() {
        let store = TableStore::new(TableKind::Cru, descriptor(), true);
        let mut revision = revision(1);
        let id = revision.id.clone();
        store.insert(LogicalTime(1), &mut revision).unwrap();
        revision.set("value", FieldValue::Int(2)).unwrap();
        store.update(LogicalTime(4), &mut revision).unwrap();

        let history = store.history(&id);
        assert_eq!(history[0].previous_time, Some(LogicalTime(1)));
        assert_eq!(history[0].next_time, None);
        assert_eq!(history[1].next_time, Some(LogicalTime(4)));
        assert_eq!(history[1].previous_time, None);
    }

    // ============================================================
    // STORE: PATCH & QUERIES
    // ============================================================

    #[test]
    fn patch_is_idempotent() {
        let store = store(TableKind::Cru);
        let mut original = revision(42);
        original.insert_time = LogicalTime(3);
        original.update_time = LogicalTime(3);

        assert_eq!(store.patch(original.clone()).unwrap(), PatchOutcome::Applied);
        assert_eq!(
            store.patch(original.clone()).unwrap(),
            PatchOutcome::Redundant
        );
        assert_eq!(store.count(LogicalTime(10)), 1);
    }

    #[test]
    fn patch_keeps_history_ordered() {
        let store = store(TableKind::Cru);
        let id = Id::generate();
        // Replicated revisions can arrive in any order.
        for time in [7u64, 3, 5] {
            let mut incoming = revision(time as i64);
            incoming.set_id(id.clone());
            incoming.insert_time = LogicalTime(3);
            incoming.update_time = LogicalTime(time);
            store.patch(incoming).unwrap();
        }
        let history = store.history(&id);
        let times: Vec<u64> = history.iter().map(|r| r.update_time.0).collect();
        assert_eq!(times, vec![7, 5, 3]);
    }

    #[test]
    fn find_by_field_scans_at_time() {
        let store = store(TableKind::Cru);
        let mut a = revision(42);
        let mut b = revision(42);
        let mut c = revision(21);
        store.insert(LogicalTime(1), &mut a).unwrap();
        store.insert(LogicalTime(2), &mut b).unwrap();
        store.insert(LogicalTime(3), &mut c).unwrap();
        b.set("value", FieldValue::Int(7)).unwrap();
        store.update(LogicalTime(5), &mut b).unwrap();

        // At time 4, both a and b still hold 42.
        assert_eq!(
            store.count_by_field(Some("value"), &FieldValue::Int(42), LogicalTime(4)),
            2
        );
        // After b's update only a does.
        let found = store.find_by_field(Some("value"), &FieldValue::Int(42), LogicalTime(6));
        assert_eq!(found.len(), 1);
        assert!(found.contains_key(&a.id));
        // Wildcard counts all rows.
        assert_eq!(store.count_by_field(None, &FieldValue::Int(0), LogicalTime(6)), 3);
    }

    #[test]
    fn dump_chunk_filters_by_chunk() {
        let store = store(TableKind::Cr);
        let chunk_a = Id::generate();
        let chunk_b = Id::generate();
        for (chunk, value) in [(&chunk_a, 1i64), (&chunk_a, 2), (&chunk_b, 3)] {
            let mut item = revision(value);
            item.chunk_id = chunk.clone();
            let mut patched = item.clone();
            patched.insert_time = LogicalTime(1);
            patched.update_time = LogicalTime(1);
            store.patch(patched).unwrap();
        }
        assert_eq!(store.dump_chunk(&chunk_a, LogicalTime(5)).len(), 2);
        assert_eq!(store.dump_chunk(&chunk_b, LogicalTime(5)).len(), 1);
    }

    // ============================================================
    // MANAGER
    // ============================================================

    #[tokio::test]
    async fn manager_registers_and_finds_tables() {
        let core = crate::testing::spawn_core().await;
        let table = crate::testing::add_test_table(&core, TableKind::Cru);
        assert_eq!(table.kind(), TableKind::Cru);
        assert!(core.tables.get_table(crate::testing::TEST_TABLE).is_some());
        assert!(core.tables.get_table("no_such_table").is_none());
        // Names are unique.
        assert!(core
            .tables
            .add_table(TableKind::Cr, crate::testing::test_descriptor())
            .is_err());
        core.shutdown().await;
    }
}
