#[cfg(all(test, target_arch = "wasm32"))]
mod tests {
    use oxlink::{DiagramEditor, EditScript, PatternKind, Point, Snapshot};
    use wasm_bindgen_test::*;

    #[wasm_bindgen_test]
    fn test_connect_and_undo() {
        let mut editor = DiagramEditor::new();
        let a = editor
            .add_element("rectangle", Point::new(0.0, 0.0))
            .expect("Failed to add first shape");
        let b = editor
            .add_element("rectangle", Point::new(400.0, 0.0))
            .expect("Failed to add second shape");

        let links = editor
            .connect_pattern(&a, &b, PatternKind::Fan)
            .expect("Failed to connect");
        assert_eq!(links.len(), 3);

        editor.undo().expect("Failed to undo");
        assert_eq!(editor.free_ports(&a).len(), 4);
    }

    #[wasm_bindgen_test]
    fn test_snapshot_round_trip() {
        let mut editor = DiagramEditor::new();
        editor
            .add_element("rectangle", Point::new(20.0, 20.0))
            .expect("Failed to add shape");

        let json = editor.snapshot().to_json().expect("Failed to serialize");
        let parsed = Snapshot::from_json(&json).expect("Failed to parse");
        assert_eq!(parsed, editor.snapshot());
    }

    #[wasm_bindgen_test]
    fn test_script_replay() {
        let script = EditScript::from_json(
            r#"{"ops": [
                {"op": "add-element", "name": "a", "x": 0, "y": 0},
                {"op": "add-element", "name": "b", "x": 300, "y": 0},
                {"op": "connect", "source": "a", "target": "b", "pattern": "grid"}
            ]}"#,
        )
        .expect("Failed to parse script");

        let mut editor = DiagramEditor::new();
        let report = script.replay(&mut editor, true);
        assert!(report.succeeded());
        assert_eq!(editor.snapshot().link_count(), 4);
    }
}
