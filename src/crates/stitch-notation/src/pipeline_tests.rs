// End-to-end cases: pattern text in, graph out

#[cfg(test)]
mod tests {
    use crate::builder::{Fabric, GraphBuilder};
    use crate::compile::compile;
    use crate::error::ErrorKind;
    use crate::expander::expand_repeats;
    use crate::indices::evaluate_indices;
    use crate::normalizer::normalize;
    use crate::options::{CompileOptions, DEFAULT_COLOR};
    use crate::parser::parse_rows;
    use crate::resolver::resolve_labels;
    use stitch_core::{CompiledPattern, NodeKind, NodeRef, Registry, WeightClass};

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    // Helper to check compiling succeeds
    fn assert_compiles(input: &str) -> CompiledPattern {
        init_logger();
        match compile(input) {
            Ok(pattern) => pattern,
            Err(e) => panic!("Failed to compile '{}': {}", input, e),
        }
    }

    // Helper to check compiling fails with a given kind
    fn assert_fails_with(input: &str, kind: ErrorKind) {
        match compile(input) {
            Ok(_) => panic!("Expected compile to fail for '{}'", input),
            Err(e) => assert_eq!(e.kind(), kind, "wrong error for '{}': {}", input, e),
        }
    }

    // Placed and resolved stitches, before export
    fn placed(input: &str) -> Fabric {
        let mut registry = Registry::builtin().unwrap();
        let options = CompileOptions::default();
        let normalized = normalize(input, &mut registry).unwrap();
        let text = expand_repeats(&normalized.expression).unwrap();
        let text = evaluate_indices(&text, &registry).unwrap();
        let rows = parse_rows(&text, &normalized.colors, DEFAULT_COLOR).unwrap();
        let mut fabric = GraphBuilder::new(&mut registry, &options).build(&rows).unwrap();
        resolve_labels(&mut fabric).unwrap();
        fabric
    }

    fn bottoms(fabric: &Fabric, instance: usize) -> Vec<NodeRef> {
        fabric.instances[instance].bottoms.clone()
    }

    #[test]
    fn test_chain_of_nine() {
        let pattern = assert_compiles("9ch");
        assert_eq!(pattern.graph.nodes.len(), 9);
        for (i, node) in pattern.graph.nodes.iter().enumerate() {
            assert_eq!(node.id, format!("0,{}|{}", i, i));
            assert_eq!(node.kind, NodeKind::Top);
            assert_eq!(node.display_type, "ch");
        }
        assert_eq!(pattern.graph.edges.len(), 8);
        assert!(pattern.graph.edges.iter().all(|e| e.weight_class == WeightClass::Primary));

        let fabric = placed("9ch");
        let ids: Vec<u64> = fabric.instances.iter().flat_map(|s| s.top_ids.clone()).collect();
        assert_eq!(ids, (1..=9).collect::<Vec<u64>>());
        assert!(fabric.instances.iter().all(|s| s.bottoms.is_empty()));
    }

    #[test]
    fn test_turned_row_skips_and_works_back() {
        let fabric = placed("3ch,turn\nsk,2sc");
        assert_eq!(fabric.instances[3].stitch, "sk");
        assert!(fabric.instances[3].top_ids.is_empty());
        assert_eq!(bottoms(&fabric, 4), vec![NodeRef::Concrete(2)]);
        assert_eq!(bottoms(&fabric, 5), vec![NodeRef::Concrete(1)]);

        let pattern = assert_compiles("3ch,turn\nsk,2sc");
        assert!(pattern.graph.edge_between("0,1|1", "1,0|4").is_some());
        assert!(pattern.graph.edge_between("0,0|0", "1,1|5").is_some());
        assert_eq!(pattern.rows[1].counts["sk"], 1);
        assert_eq!(pattern.rows[1].counts["sc"], 2);
    }

    #[test]
    fn test_rescaled_copy() {
        let pattern = assert_compiles("DEF: dc=Copy(dc,3)\n3ch\ndc");
        let into_bottom = pattern.graph.edge_between("0,0|0", "1,0|3").unwrap();
        assert_eq!(into_bottom.length, 6.0);
        let from_previous = pattern.graph.edge_between("0,2|2", "1,0|3").unwrap();
        assert_eq!(from_previous.length, 1.0);
        assert_eq!(pattern.definitions, vec!["dc=Copy(dc,3)".to_string()]);
    }

    #[test]
    fn test_synthesized_together() {
        let pattern = assert_compiles("6ch\nsc3tog,sc3tog");
        let tops = pattern
            .graph
            .nodes
            .iter()
            .filter(|n| n.kind == NodeKind::Top && n.id.starts_with("1,"))
            .count();
        assert_eq!(tops, 2);
        for head in ["1,0|6", "1,1|7"] {
            let secondary = pattern
                .graph
                .edges_into(head)
                .filter(|e| e.weight_class == WeightClass::Secondary)
                .count();
            assert_eq!(secondary, 3, "edges into {}", head);
        }
        // variants keep the base stitch's tag
        assert_eq!(pattern.graph.node("1,0|6").unwrap().display_type, "sc");
        assert_eq!(pattern.rows[1].counts["sc3tog"], 2);
    }

    #[test]
    fn test_label_groups() {
        let fabric = placed("3ch.A\n3sc@A[;0]\n3sc@A[;1]~");
        let row1: Vec<NodeRef> = (3..6).flat_map(|i| bottoms(&fabric, i)).collect();
        let row2: Vec<NodeRef> = (6..9).flat_map(|i| bottoms(&fabric, i)).collect();
        let forward: Vec<NodeRef> = (1..=3).map(NodeRef::Concrete).collect();
        let backward: Vec<NodeRef> = forward.iter().rev().cloned().collect();
        assert_eq!(row1, forward);
        assert_eq!(row2, backward);
    }

    #[test]
    fn test_unbalanced_bracket() {
        assert_fails_with("3sc]", ErrorKind::UnbalancedBrackets);
    }

    #[test]
    fn test_error_kinds() {
        assert_fails_with("ch,turn,ch", ErrorKind::TurnNotAtRowEnd);
        assert_fails_with("3ch\nsc,zz", ErrorKind::UnknownStitchType);
        assert_fails_with("3ch\nsc@Q", ErrorKind::LabelNotFound);
        assert_fails_with("3ch\nsc@[0,7]", ErrorKind::AddressNotFound);
        assert_fails_with("sc*x", ErrorKind::MultiplierParseError);
        assert_fails_with("sc,>,sc", ErrorKind::UnsupportedNesting);
        assert_fails_with("DEF: sc=dc\nsc", ErrorKind::NameCollision);
        assert_fails_with("DEF: P=sc\nDEF: P=dc\nP", ErrorKind::DuplicateDefinition);
        assert_fails_with("ch.A,ch,ch.A\n3sc@A", ErrorKind::AmbiguousLabelDefinition);
        assert_fails_with("2ch.A+1\n3sc@A", ErrorKind::AddressNotFound);
        assert_fails_with("ch,@[0,0]^", ErrorKind::Syntax);
        assert_fails_with("$i=9223372036854775807$,3ch\nsc@[0,i++],sc@[0,i]", ErrorKind::Syntax);
    }

    #[test]
    fn test_address_errors_name_the_place() {
        let err = compile("3ch\nsc@[dc:0,1]").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AddressNotFound);
        assert!(err.message.contains("row 0, position 1, type dc"), "{}", err.message);
        assert_eq!(err.snippet.as_deref(), Some("sc"));
    }

    #[test]
    fn test_variables_drive_addresses() {
        let fabric = placed("$i=0$,5ch\nsc@[0,i++],sc@[0,i++]");
        assert_eq!(bottoms(&fabric, 5), vec![NodeRef::Concrete(1)]);
        assert_eq!(bottoms(&fabric, 6), vec![NodeRef::Concrete(2)]);

        let fabric = placed("$i=1$,3ch\nsc@[0,next i],sc@[0,prev i]");
        assert_eq!(bottoms(&fabric, 3), vec![NodeRef::Concrete(3)]);
        assert_eq!(bottoms(&fabric, 4), vec![NodeRef::Concrete(2)]);
    }

    #[test]
    fn test_typed_addresses() {
        let fabric = placed("4ch\nsc,dc,sc,dc\nsc@[dc:1,1]");
        assert_eq!(bottoms(&fabric, 8), vec![NodeRef::Concrete(8)]);
        let pattern = assert_compiles("4ch\nsc,dc,sc,dc\nsc@[dc:1,1]");
        assert!(pattern.graph.edge_between("1,3|7", "2,0|8").is_some());
    }

    #[test]
    fn test_early_exit_repeats() {
        let pattern = assert_compiles("3ch\n2*[sc,>,ch]");
        assert_eq!(pattern.rows[1].counts["sc"], 2);
        assert_eq!(pattern.rows[1].counts["ch"], 1);
    }

    #[test]
    fn test_colors() {
        let pattern = assert_compiles("ch,COLOR:red,ch\nsc");
        assert_eq!(pattern.graph.nodes[0].color, DEFAULT_COLOR);
        assert_eq!(pattern.graph.nodes[1].color, "red");
        assert_eq!(pattern.graph.node("1,0|2").unwrap().color, "red");
        assert!(pattern.graph.edges.iter().all(|e| e.color == "red"));
    }

    #[test]
    fn test_metadata_passes_through() {
        let source = "DOT: iterations=4000\nBACKGROUND: #102030\nTRANSFORM_OBJECT: 1,0,0\nDEF: P=sc\n3ch\n3P";
        let pattern = assert_compiles(source);
        assert_eq!(pattern.metadata, vec!["iterations=4000".to_string()]);
        assert_eq!(pattern.background.as_deref(), Some("#102030"));
        assert_eq!(pattern.transforms, vec!["1,0,0".to_string()]);
        assert_eq!(pattern.definitions.len(), 1);
        assert_eq!(pattern.rows[1].counts["sc"], 3);
    }

    #[test]
    fn test_post_stitches() {
        let pattern = assert_compiles("3ch\nch,dc3bobble.P^0,ch\n3sc@P");
        assert_eq!(pattern.graph.node("1,1D|4").unwrap().kind, NodeKind::Hidden);
        assert!(pattern.graph.edge_between("1,1D|4", "2,0|6").is_some());
        assert!(pattern.graph.edge_between("1,1|4", "2,2|8").is_some());
    }

    #[test]
    fn test_outputs() {
        let pattern = assert_compiles("DOT: iterations=10\n2ch");
        let json = pattern.to_json().unwrap();
        assert!(json.contains("\"displayType\": \"ch\""));
        assert!(json.contains("\"weight_class\": \"primary\""));
        let text = pattern.to_text();
        assert!(text.contains("\"0,0|0\" -- \"0,1|1\" 1 [primary]"));
        assert!(text.ends_with("DOT: iterations=10\n"));
    }

    proptest::proptest! {
        #[test]
        fn prop_ids_are_contiguous(width in 1usize..8, turns in proptest::collection::vec(proptest::bool::ANY, 1..5)) {
            let mut rows = Vec::new();
            for (r, turn) in turns.iter().enumerate() {
                let stitch = if r == 0 { "ch" } else { "sc" };
                rows.push(format!("{}{}{}", width, stitch, if *turn { ",turn" } else { "" }));
            }
            let fabric = placed(&rows.join("\n"));
            let ids: Vec<u64> = fabric.instances.iter().flat_map(|s| s.top_ids.clone()).collect();
            let expected: Vec<u64> = (1..=(width * turns.len()) as u64).collect();
            proptest::prop_assert_eq!(ids, expected);
        }

        #[test]
        fn prop_label_round_trip(count in 1usize..8, turn in proptest::bool::ANY) {
            let source = format!("{}ch.A{}\n{}sc@A", count, if turn { ",turn" } else { "" }, count);
            let fabric = placed(&source);
            let got: Vec<NodeRef> = fabric.instances[count..].iter().flat_map(|s| s.bottoms.clone()).collect();
            let mut expected: Vec<NodeRef> = (1..=count as u64).map(NodeRef::Concrete).collect();
            if turn {
                expected.reverse();
            }
            proptest::prop_assert_eq!(got, expected);
        }

        #[test]
        fn prop_split_edges_sum_to_connection(tops in 2usize..7, stitches in 1usize..12) {
            let pattern = compile(&format!("{}ch.A\n{}sc@A", tops, stitches)).unwrap();
            for split in pattern.graph.nodes.iter().filter(|n| n.kind == NodeKind::Hidden) {
                let total: f64 = pattern
                    .graph
                    .edges
                    .iter()
                    .filter(|e| e.weight_class == WeightClass::Internal && (e.head == split.id || e.tail == split.id))
                    .map(|e| e.length)
                    .sum();
                proptest::prop_assert!((total - 1.0).abs() < 1e-9, "{} pulls {}", split.id, total);
            }
        }
    }
}
