use std::collections::HashMap;

use handshake_core::{Chunk, DistanceMetric, HandshakeError, SearchResult};
use qdrant_client::qdrant::{value::Kind, Distance, PointId, Value as QdrantValue};
use serde_json::{Map, Value as JsonValue};

pub(crate) type JsonMap = Map<String, JsonValue>;

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Payload stored alongside each point.
pub(crate) fn record_payload(id: &str, chunk: &Chunk, created_at: &str) -> JsonMap {
    let mut payload = JsonMap::new();
    payload.insert("id".into(), JsonValue::String(id.to_string()));
    payload.insert("text".into(), JsonValue::String(chunk.text.clone()));
    payload.insert("start_index".into(), chunk.start_index.into());
    payload.insert("end_index".into(), chunk.end_index.into());
    payload.insert("token_count".into(), chunk.token_count.into());
    payload.insert(
        "metadata".into(),
        JsonValue::Object(chunk.metadata.clone().into_iter().collect()),
    );
    payload.insert("created_at".into(), JsonValue::String(created_at.to_string()));
    payload
}

/// Rebuild a [`SearchResult`] from a stored payload. Missing fields fall back
/// to empty values so points written by other tools still come back.
pub(crate) fn search_result_from_payload(
    payload: &JsonMap,
    fallback_id: String,
    distance: f32,
) -> SearchResult {
    let usize_field = |key: &str| {
        payload
            .get(key)
            .and_then(JsonValue::as_u64)
            .unwrap_or_default() as usize
    };

    SearchResult {
        id: payload
            .get("id")
            .and_then(JsonValue::as_str)
            .map(str::to_string)
            .unwrap_or(fallback_id),
        text: payload
            .get("text")
            .and_then(JsonValue::as_str)
            .unwrap_or_default()
            .to_string(),
        distance,
        start_index: usize_field("start_index"),
        end_index: usize_field("end_index"),
        token_count: usize_field("token_count"),
        metadata: match payload.get("metadata") {
            Some(JsonValue::Object(map)) => map.clone().into_iter().collect(),
            _ => HashMap::new(),
        },
    }
}

// ---------------------------------------------------------------------------
// Point ids
// ---------------------------------------------------------------------------

/// Qdrant only accepts UUIDs (or integers) as point ids, so other record ids
/// map onto a deterministic UUID v5.
pub(crate) fn point_uuid(id: &str) -> String {
    match uuid::Uuid::parse_str(id) {
        Ok(uuid) => uuid.to_string(),
        Err(_) => uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, id.as_bytes()).to_string(),
    }
}

pub(crate) fn point_id(id: &str) -> PointId {
    PointId::from(point_uuid(id))
}

// ---------------------------------------------------------------------------
// Metrics and scores
// ---------------------------------------------------------------------------

pub(crate) fn to_qdrant_distance(metric: DistanceMetric) -> Distance {
    match metric {
        DistanceMetric::L2 => Distance::Euclid,
        DistanceMetric::Cosine => Distance::Cosine,
        DistanceMetric::InnerProduct => Distance::Dot,
    }
}

pub(crate) fn from_qdrant_distance(distance: Distance) -> Result<DistanceMetric, HandshakeError> {
    match distance {
        Distance::Euclid => Ok(DistanceMetric::L2),
        Distance::Cosine => Ok(DistanceMetric::Cosine),
        Distance::Dot => Ok(DistanceMetric::InnerProduct),
        other => Err(HandshakeError::SchemaMismatch(format!(
            "collection uses unsupported distance {}",
            other.as_str_name()
        ))),
    }
}

/// Qdrant reports similarity for cosine and dot, and distance for euclid.
/// Normalise to "smaller is closer".
pub(crate) fn score_to_distance(metric: DistanceMetric, score: f32) -> f32 {
    match metric {
        DistanceMetric::L2 => score,
        DistanceMetric::Cosine => 1.0 - score,
        DistanceMetric::InnerProduct => -score,
    }
}

// ---------------------------------------------------------------------------
// JSON <-> Qdrant values
// ---------------------------------------------------------------------------

pub(crate) fn json_map_to_qdrant(map: &JsonMap) -> HashMap<String, QdrantValue> {
    map.iter()
        .map(|(k, v)| (k.clone(), json_to_qdrant(v)))
        .collect()
}

pub(crate) fn qdrant_map_to_json(map: &HashMap<String, QdrantValue>) -> JsonMap {
    map.iter()
        .map(|(k, v)| (k.clone(), qdrant_to_json(v)))
        .collect()
}

fn json_to_qdrant(json: &JsonValue) -> QdrantValue {
    let kind = match json {
        JsonValue::Null => Kind::NullValue(0),
        JsonValue::Bool(b) => Kind::BoolValue(*b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => Kind::IntegerValue(i),
            None => Kind::DoubleValue(n.as_f64().unwrap_or(0.0)),
        },
        JsonValue::String(s) => Kind::StringValue(s.clone()),
        JsonValue::Array(arr) => Kind::ListValue(qdrant_client::qdrant::ListValue {
            values: arr.iter().map(json_to_qdrant).collect(),
        }),
        JsonValue::Object(map) => Kind::StructValue(qdrant_client::qdrant::Struct {
            fields: json_map_to_qdrant(map),
        }),
    };
    QdrantValue { kind: Some(kind) }
}

fn qdrant_to_json(val: &QdrantValue) -> JsonValue {
    match &val.kind {
        None | Some(Kind::NullValue(_)) => JsonValue::Null,
        Some(Kind::BoolValue(b)) => JsonValue::Bool(*b),
        Some(Kind::IntegerValue(i)) => JsonValue::Number((*i).into()),
        Some(Kind::DoubleValue(d)) => serde_json::Number::from_f64(*d)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        Some(Kind::StringValue(s)) => JsonValue::String(s.clone()),
        Some(Kind::ListValue(list)) => {
            JsonValue::Array(list.values.iter().map(qdrant_to_json).collect())
        }
        Some(Kind::StructValue(st)) => JsonValue::Object(qdrant_map_to_json(&st.fields)),
    }
}
