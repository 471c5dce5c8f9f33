#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use crate::core::MapCore;
    use crate::spatial::index::grid_cells;
    use crate::spatial::BoundingBox;
    use crate::table::net_table::NetTable;
    use crate::table::types::{Id, TableKind};
    use crate::testing::{add_test_table, settle, spawn_cluster};

    /// 2x2x2 grid over [0,2]^3; boxes a..d reproduce the classic layout:
    ///
    /// (0,0,0) has {a, b, c}    (1,0,0) has {b, c}
    /// (0,0,1) has {b}          (1,0,1) has {b, d}
    /// (0,1,0) has {b}          (1,1,0) has {b}
    /// (0,1,1) has {b}          (1,1,1) has {b, d}
    fn bounds() -> BoundingBox {
        vec![0.0..2.0, 0.0..2.0, 0.0..2.0]
    }

    fn subdivision() -> Vec<usize> {
        vec![2, 2, 2]
    }

    fn box_a() -> BoundingBox {
        vec![0.2..0.8, 0.2..0.8, 0.2..0.8]
    }

    fn box_b() -> BoundingBox {
        vec![0.8..1.2, 0.8..1.2, 0.8..1.2]
    }

    fn box_c() -> BoundingBox {
        vec![0.9..1.1, 0.2..0.8, 0.2..0.8]
    }

    fn box_d() -> BoundingBox {
        vec![1.2..1.8, 0.8..1.2, 1.2..1.8]
    }

    fn cell(x: usize, y: usize, z: usize) -> usize {
        x * 4 + y * 2 + z
    }

    // ============================================================
    // GRID ENUMERATION
    // ============================================================

    #[test]
    fn boxes_touch_the_expected_cells() {
        let bounds = bounds();
        let subdivision = subdivision();
        assert_eq!(
            grid_cells(&bounds, &subdivision, &box_a()),
            vec![cell(0, 0, 0)]
        );
        assert_eq!(grid_cells(&bounds, &subdivision, &box_b()).len(), 8);
        assert_eq!(
            grid_cells(&bounds, &subdivision, &box_c()),
            vec![cell(0, 0, 0), cell(1, 0, 0)]
        );
        assert_eq!(
            grid_cells(&bounds, &subdivision, &box_d()),
            vec![cell(1, 0, 1), cell(1, 1, 1)]
        );
    }

    #[test]
    fn degenerate_boxes_touch_nothing() {
        let bounds = bounds();
        let subdivision = subdivision();
        let empty: BoundingBox = vec![1.0..1.0, 0.0..2.0, 0.0..2.0];
        assert!(grid_cells(&bounds, &subdivision, &empty).is_empty());
        let outside: BoundingBox = vec![3.0..4.0, 0.0..1.0, 0.0..1.0];
        assert!(grid_cells(&bounds, &subdivision, &outside).is_empty());
    }

    #[test]
    fn boundary_box_does_not_leak_into_next_cell() {
        let bounds = bounds();
        let subdivision = subdivision();
        // Ends exactly on the cell boundary.
        let flush: BoundingBox = vec![0.0..1.0, 0.0..1.0, 0.0..1.0];
        assert_eq!(grid_cells(&bounds, &subdivision, &flush), vec![cell(0, 0, 0)]);
    }

    // ============================================================
    // DISTRIBUTED OVERLAY
    // ============================================================

    async fn build_spatial(n: usize) -> (Vec<Arc<MapCore>>, Vec<Arc<NetTable>>) {
        let cores = spawn_cluster(n).await;
        let mut tables = Vec::with_capacity(n);
        for core in &cores {
            tables.push(add_test_table(core, TableKind::Cr));
        }
        tables[0].create_index();
        for table in tables.iter().skip(1) {
            table.join_index(cores[0].own_id()).await.unwrap();
        }
        for table in &tables {
            table.create_spatial_index(bounds(), subdivision()).unwrap();
        }
        (cores, tables)
    }

    #[tokio::test]
    async fn registered_chunks_are_found_by_box_queries() {
        let (cores, tables) = build_spatial(2).await;

        let chunk_a = tables[0].new_chunk();
        let chunk_b = tables[0].new_chunk();
        let chunk_c = tables[0].new_chunk();
        let chunk_d = tables[0].new_chunk();
        tables[0]
            .register_chunk_in_space(chunk_a.id(), &box_a())
            .await
            .unwrap();
        tables[0]
            .register_chunk_in_space(chunk_b.id(), &box_b())
            .await
            .unwrap();
        tables[0]
            .register_chunk_in_space(chunk_c.id(), &box_c())
            .await
            .unwrap();
        tables[0]
            .register_chunk_in_space(chunk_d.id(), &box_d())
            .await
            .unwrap();

        let expect = |ids: &[&Id]| -> BTreeSet<Id> {
            ids.iter().map(|id| (*id).clone()).collect()
        };

        // Queries answer from either peer.
        for table in &tables {
            assert_eq!(
                table.get_chunks_in_bounding_box(&box_a()).await.unwrap(),
                expect(&[chunk_a.id(), chunk_b.id(), chunk_c.id()])
            );
            assert_eq!(
                table.get_chunks_in_bounding_box(&box_b()).await.unwrap(),
                expect(&[chunk_a.id(), chunk_b.id(), chunk_c.id(), chunk_d.id()])
            );
            assert_eq!(
                table.get_chunks_in_bounding_box(&box_d()).await.unwrap(),
                expect(&[chunk_b.id(), chunk_d.id()])
            );
        }
        for core in cores {
            core.shutdown().await;
        }
    }

    #[tokio::test]
    async fn listeners_receive_newly_registered_chunks() {
        let (cores, tables) = build_spatial(2).await;

        // Peer 1 listens on the d region before anything is registered.
        tables[1].listen_to_space(&box_d()).await.unwrap();

        let chunk = tables[0].new_chunk();
        settle().await;
        tables[0]
            .register_chunk_in_space(chunk.id(), &box_d())
            .await
            .unwrap();
        settle().await;

        // The trigger made peer 1 fetch the chunk and become a holder.
        assert!(tables[1].has_chunk(chunk.id()));
        assert_eq!(chunk.peer_size(), 1);
        for core in cores {
            core.shutdown().await;
        }
    }
}
