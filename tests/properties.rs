#![cfg(not(target_arch = "wasm32"))]

use oxlink::{CellId, CellRecord, DiagramEditor, GraphModel, PatternKind, Point, Snapshot};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Add(u16, u16),
    Connect(usize, usize, u8),
    Delete(usize),
    Move(usize, u16, u16),
    Undo,
    Redo,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0u16..3000, 0u16..3000).prop_map(|(x, y)| Op::Add(x, y)),
        3 => (0usize..8, 0usize..8, 1u8..=4).prop_map(|(a, b, mode)| Op::Connect(a, b, mode)),
        1 => (0usize..8).prop_map(Op::Delete),
        2 => (0usize..8, 0u16..3000, 0u16..3000).prop_map(|(i, x, y)| Op::Move(i, x, y)),
        1 => Just(Op::Undo),
        1 => Just(Op::Redo),
    ]
}

fn pick(editor: &DiagramEditor, index: usize) -> Option<CellId> {
    let elements = editor.graph().elements();
    if elements.is_empty() {
        None
    } else {
        Some(elements[index % elements.len()].clone())
    }
}

fn apply(editor: &mut DiagramEditor, op: &Op) {
    match *op {
        Op::Add(x, y) => {
            let _ = editor.add_element("rectangle", Point::new(x as f32, y as f32));
        }
        Op::Connect(a, b, mode) => {
            if let (Some(a), Some(b)) = (pick(editor, a), pick(editor, b)) {
                let pattern = PatternKind::from_mode(mode).unwrap_or_default();
                let _ = editor.connect_pattern(&a, &b, pattern);
            }
        }
        Op::Delete(i) => {
            if let Some(target) = pick(editor, i) {
                let _ = editor.delete(&[target]);
            }
        }
        Op::Move(i, x, y) => {
            if let Some(target) = pick(editor, i) {
                let _ = editor.move_elements(vec![(target, Point::new(x as f32, y as f32))]);
            }
        }
        Op::Undo => {
            let _ = editor.undo();
        }
        Op::Redo => {
            let _ = editor.redo();
        }
    }
}

/// Undo of a delete re-appends cells, so replays are compared by content, not order.
fn cells_by_id(snapshot: Snapshot) -> Vec<CellRecord> {
    let mut cells = snapshot.cells;
    cells.sort_by(|a, b| a.id.cmp(&b.id));
    cells
}

fn assert_ports_consistent(editor: &DiagramEditor) {
    let graph = editor.graph();
    let ports = editor.ports();

    for (shape, port, link) in ports.claims() {
        let record = graph.get(&link).expect("claimed port points at a live link");
        let touches = [record.source.as_ref(), record.target.as_ref()]
            .into_iter()
            .flatten()
            .any(|end| end.id == shape && end.port.as_ref() == Some(&port));
        assert!(touches, "{shape}/{port} claimed by {link} which does not use it");
    }

    for link in graph.links() {
        let record = graph.get(&link).expect("listed link exists");
        for end in [record.source.as_ref(), record.target.as_ref()].into_iter().flatten() {
            let port = end.port.as_ref().expect("engine links are attached to ports");
            assert_eq!(ports.occupant(&end.id, port), Some(&link));
        }
        assert_ne!(
            record.source.as_ref().map(|end| &end.id),
            record.target.as_ref().map(|end| &end.id)
        );
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn ports_stay_exclusive(ops in prop::collection::vec(op(), 1..40)) {
        let mut editor = DiagramEditor::new();
        for op in &ops {
            apply(&mut editor, op);
            assert_ports_consistent(&editor);
        }
    }

    #[test]
    fn undo_all_then_redo_all_round_trips(ops in prop::collection::vec(op(), 1..40)) {
        let mut editor = DiagramEditor::new();
        for op in &ops {
            apply(&mut editor, op);
        }
        let final_state = cells_by_id(editor.snapshot());
        let applied = editor.history().cursor();

        for _ in 0..applied {
            prop_assert!(editor.undo().is_ok());
        }
        prop_assert_eq!(editor.graph().element_count(), 0);
        prop_assert_eq!(editor.graph().link_count(), 0);
        prop_assert!(editor.ports().claims().is_empty());

        for _ in 0..applied {
            prop_assert!(editor.redo().is_ok());
        }
        prop_assert_eq!(cells_by_id(editor.snapshot()), final_state);
        assert_ports_consistent(&editor);
    }
}
