use std::sync::Arc;

use serde_json::json;
use tempfile::tempdir;

use deltagraph::encoding::{self, EncodeState};
use deltagraph::query_ctx::ExecutionFlags;
use deltagraph::schema::IndexFieldType;
use deltagraph::{CommandCtx, GraphConfig, GraphContext, GraphError, QueryCtx, QueryStatus, SchemaKind};

fn config() -> GraphConfig {
    GraphConfig::default()
        .with_node_capacity(32)
        .with_edge_capacity(32)
}

/// Builds a graph with tombstones in both stores and an index.
fn populated() -> Arc<GraphContext> {
    let gc = GraphContext::new("social", config()).expect("graph context");
    let mut ctx = QueryCtx::new(CommandCtx::new("GRAPH.QUERY", "CREATE ...", Arc::clone(&gc))).expect("ctx");
    ctx.set_flags(ExecutionFlags::WRITE).expect("flags");
    let status = ctx
        .run(
            |q| {
                let mut people = Vec::new();
                for (i, name) in ["ana", "ben", "cid", "dee", "eve", "fay"].iter().enumerate() {
                    let id = q.create_node(&["Person"], &[("name", json!(name)), ("age", json!(20 + i))])?;
                    people.push(id);
                }
                let city = q.create_node(&["City"], &[("name", json!("Lima"))])?;
                let mut knows = Vec::new();
                for pair in people.windows(2) {
                    knows.push(q.create_edge(pair[0], pair[1], "KNOWS", &[])?);
                }
                q.create_edge(people[0], city, "LIVES_IN", &[("since", json!(2019))])?;
                q.delete_edge(knows[3])?;
                q.delete_edge(knows[2])?;
                q.delete_edge(knows[4])?;
                q.delete_node(people[5])?;
                q.delete_node(people[3])?;
                q.create_index(SchemaKind::Node, "Person", "name", IndexFieldType::Range)?;
                Ok(())
            },
            |_| {},
        )
        .expect("run");
    assert_eq!(status, QueryStatus::Success);
    gc
}

#[test]
fn test_snapshot_round_trip_through_a_file() {
    let gc = populated();
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("social.graph");

    encoding::encode_graph_to_path(&gc, &path).expect("encode");
    assert_eq!(gc.encoding_context().lock().state(), EncodeState::Done);
    let restored = encoding::decode_graph_from_path(config(), &path).expect("decode");

    assert_eq!(restored.name(), "social");
    assert_eq!(restored.attribute_names(), gc.attribute_names());
    assert_eq!(restored.schema_names(SchemaKind::Node), vec!["Person", "City"]);
    assert_eq!(restored.schema_for("Person", SchemaKind::Node), gc.schema_for("Person", SchemaKind::Node));
    assert_eq!(restored.index_count(), 1);

    let original = gc.graph().acquire_read();
    let decoded = restored.graph().acquire_read();
    assert_eq!(decoded.export(), original.export());
    assert_eq!(decoded.node_store(), original.node_store());
    assert_eq!(decoded.edge_store(), original.edge_store());
    assert_eq!(decoded.statistics(), original.statistics());

    let progress = restored.decoding_context().lock().progress();
    assert_eq!(progress.nodes, 5);
    assert_eq!(progress.deleted_nodes, 2);
    assert_eq!(progress.edges, 3);
    assert_eq!(progress.deleted_edges, 3);
}

#[test]
fn test_decoded_graph_reuses_ids_in_the_same_order() {
    let gc = populated();
    let mut snapshot = Vec::new();
    encoding::encode_graph(&gc, &mut snapshot).expect("encode");
    let restored = encoding::decode_graph(config(), snapshot.as_slice()).expect("decode");

    let mut original = gc.graph().acquire_write();
    let mut decoded = restored.graph().acquire_write();
    for _ in 0..3 {
        assert_eq!(
            decoded.create_node(&[]).expect("decoded node"),
            original.create_node(&[]).expect("original node")
        );
    }
    let knows = restored.schema_id("KNOWS", SchemaKind::Edge).expect("KNOWS");
    assert_eq!(
        decoded.create_edge(0, 1, knows).expect("decoded edge"),
        original.create_edge(0, 1, knows).expect("original edge")
    );
}

#[test]
fn test_out_of_order_sections_are_rejected() {
    let gc = populated();
    let mut snapshot = Vec::new();
    encoding::encode_graph(&gc, &mut snapshot).expect("encode");
    let text = String::from_utf8(snapshot).expect("utf8");

    let mut lines: Vec<&str> = text.lines().collect();
    let attribute = lines.remove(1);
    lines.push(attribute);
    let shuffled = lines.join("\n");
    let err = encoding::decode_graph(config(), shuffled.as_bytes()).err().expect("out of order");
    assert!(matches!(err, GraphError::Serialization(_)));

    let truncated: String = text.lines().take(8).collect::<Vec<_>>().join("\n");
    let err = encoding::decode_graph(config(), truncated.as_bytes()).err().expect("truncated");
    assert!(matches!(err, GraphError::Serialization(_)));
}

/// Re-encodes the snapshot with `edit` applied to the first record of `kind`.
fn tampered(text: &str, kind: &str, edit: impl FnOnce(&mut serde_json::Value)) -> String {
    let mut edit = Some(edit);
    text.lines()
        .map(|line| {
            let mut record: serde_json::Value = serde_json::from_str(line).expect("record");
            if record["type"] == kind {
                if let Some(edit) = edit.take() {
                    edit(&mut record);
                }
            }
            record.to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn snapshot_text() -> String {
    let mut snapshot = Vec::new();
    encoding::encode_graph(&populated(), &mut snapshot).expect("encode");
    String::from_utf8(snapshot).expect("utf8")
}

#[test]
fn test_header_counts_must_match_decoded_sections() {
    let text = snapshot_text();
    assert!(encoding::decode_graph(config(), tampered(&text, "header", |_| {}).as_bytes()).is_ok());

    for field in ["label_count", "relation_count", "attribute_count", "deleted_edge_count"] {
        let edited = tampered(&text, "header", |h| {
            h[field] = json!(h[field].as_u64().expect("count") + 1);
            if field == "deleted_edge_count" {
                h["edge_high_water_mark"] = json!(h["edge_high_water_mark"].as_u64().expect("hwm") + 1);
            }
        });
        let err = encoding::decode_graph(config(), edited.as_bytes()).err().expect(field);
        assert!(matches!(err, GraphError::Serialization(_)), "{field}: {err}");
    }
}

#[test]
fn test_ids_past_the_high_water_mark_are_rejected() {
    let text = snapshot_text();

    let inflated = tampered(&text, "header", |h| h["node_high_water_mark"] = json!(1u64 << 40));
    let err = encoding::decode_graph(config(), inflated.as_bytes()).err().expect("inflated mark");
    assert!(matches!(err, GraphError::Serialization(_)));

    let far = tampered(&text, "node", |n| n["id"] = json!(1u64 << 40));
    let err = encoding::decode_graph(config(), far.as_bytes()).err().expect("far node");
    assert!(matches!(err, GraphError::Serialization(_)));
}
