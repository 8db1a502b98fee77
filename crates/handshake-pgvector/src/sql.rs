//! SQL text for the pgvector table. Identifiers are interpolated, values are
//! always bound.

use handshake_core::{DistanceMetric, HandshakeError, IndexSpec};

/// Check that a table name is safe to interpolate into SQL.
///
/// Allows ASCII alphanumerics and underscores, with at most one dot for a
/// schema-qualified name such as `public.documents`.
pub(crate) fn validate_table_name(name: &str) -> Result<(), HandshakeError> {
    if name.is_empty() {
        return Err(HandshakeError::Configuration(
            "table name must not be empty".to_string(),
        ));
    }
    let valid_part = |part: &str| {
        !part.is_empty()
            && !part.starts_with(|c: char| c.is_ascii_digit())
            && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    };
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() > 2 || !parts.iter().all(|p| valid_part(p)) {
        return Err(HandshakeError::Configuration(format!(
            "invalid table name '{name}': only alphanumeric, underscore, and one schema dot are allowed",
        )));
    }
    Ok(())
}

/// pgvector distance operator for a metric.
pub(crate) fn operator(metric: DistanceMetric) -> &'static str {
    match metric {
        DistanceMetric::L2 => "<->",
        DistanceMetric::Cosine => "<=>",
        DistanceMetric::InnerProduct => "<#>",
    }
}

/// Operator class an index must be built with to serve `metric`.
pub(crate) fn operator_class(metric: DistanceMetric) -> &'static str {
    match metric {
        DistanceMetric::L2 => "vector_l2_ops",
        DistanceMetric::Cosine => "vector_cosine_ops",
        DistanceMetric::InnerProduct => "vector_ip_ops",
    }
}

pub(crate) fn create_table(table: &str, dimension: usize) -> String {
    format!(
        r#"CREATE TABLE IF NOT EXISTS {table} (
            id TEXT PRIMARY KEY,
            text TEXT NOT NULL,
            embedding vector({dimension}) NOT NULL,
            start_index INTEGER,
            end_index INTEGER,
            token_count INTEGER,
            metadata JSONB NOT NULL DEFAULT '{{}}',
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )"#
    )
}

/// Width of the `embedding` column of an existing table, `NULL` when the
/// table has no such column.
pub(crate) const EMBEDDING_WIDTH: &str = r#"SELECT a.atttypmod
    FROM pg_attribute a
    WHERE a.attrelid = to_regclass($1)
      AND a.attname = 'embedding'
      AND NOT a.attisdropped"#;

pub(crate) const TABLE_EXISTS: &str = "SELECT to_regclass($1) IS NOT NULL";

pub(crate) fn upsert(table: &str) -> String {
    format!(
        r#"INSERT INTO {table} (id, text, embedding, start_index, end_index, token_count, metadata)
           VALUES ($1, $2, $3, $4, $5, $6, $7)
           ON CONFLICT (id) DO UPDATE
           SET text = EXCLUDED.text,
               embedding = EXCLUDED.embedding,
               start_index = EXCLUDED.start_index,
               end_index = EXCLUDED.end_index,
               token_count = EXCLUDED.token_count,
               metadata = EXCLUDED.metadata,
               created_at = now()"#
    )
}

pub(crate) fn search(table: &str, metric: DistanceMetric) -> String {
    let op = operator(metric);
    format!(
        r#"SELECT id, text, start_index, end_index, token_count, metadata,
                  (embedding {op} $1)::float8 AS distance
           FROM {table}
           ORDER BY embedding {op} $1
           LIMIT $2"#
    )
}

pub(crate) fn count(table: &str) -> String {
    format!("SELECT COUNT(*) FROM {table}")
}

/// Index names live in the table's schema, so only the bare table name is
/// used as prefix.
pub(crate) fn index_name(table: &str, spec: &IndexSpec, metric: DistanceMetric) -> String {
    let bare = table.rsplit('.').next().unwrap_or(table);
    format!("{bare}_embedding_{}_{}_idx", spec.family(), metric.as_str())
}

pub(crate) fn create_index(table: &str, spec: &IndexSpec, metric: DistanceMetric) -> String {
    let name = index_name(table, spec, metric);
    let ops = operator_class(metric);
    let (method, params) = match spec {
        IndexSpec::Hnsw { m, ef_construction } => {
            ("hnsw", format!("m = {m}, ef_construction = {ef_construction}"))
        }
        IndexSpec::IvfFlat { lists } => ("ivfflat", format!("lists = {lists}")),
    };
    format!("CREATE INDEX IF NOT EXISTS {name} ON {table} USING {method} (embedding {ops}) WITH ({params})")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_table_name_accepts_valid_names() {
        assert!(validate_table_name("documents").is_ok());
        assert!(validate_table_name("my_docs").is_ok());
        assert!(validate_table_name("public.documents").is_ok());
        assert!(validate_table_name("handshake_0123456789ab").is_ok());
    }

    #[test]
    fn validate_table_name_rejects_sql_injection() {
        assert!(validate_table_name("docs; DROP TABLE users").is_err());
        assert!(validate_table_name("docs--comment").is_err());
        assert!(validate_table_name("docs'malicious").is_err());
        assert!(validate_table_name("a.b.c").is_err());
        assert!(validate_table_name(".docs").is_err());
        assert!(validate_table_name("1docs").is_err());
        assert!(validate_table_name("").is_err());
    }

    #[test]
    fn create_table_carries_width() {
        let sql = create_table("docs", 384);
        assert!(sql.contains("CREATE TABLE IF NOT EXISTS docs"));
        assert!(sql.contains("embedding vector(384) NOT NULL"));
        assert!(sql.contains("metadata JSONB NOT NULL DEFAULT '{}'"));
    }

    #[test]
    fn search_orders_by_the_metric_operator() {
        let sql = search("docs", DistanceMetric::InnerProduct);
        assert!(sql.contains("(embedding <#> $1)::float8 AS distance"));
        assert!(sql.contains("ORDER BY embedding <#> $1"));
        assert!(search("docs", DistanceMetric::L2).contains("<->"));
        assert!(search("docs", DistanceMetric::Cosine).contains("<=>"));
    }

    #[test]
    fn hnsw_index_statement() {
        let sql = create_index("docs", &IndexSpec::hnsw(), DistanceMetric::Cosine);
        assert_eq!(
            sql,
            "CREATE INDEX IF NOT EXISTS docs_embedding_hnsw_cosine_idx ON docs \
             USING hnsw (embedding vector_cosine_ops) WITH (m = 16, ef_construction = 64)"
        );
    }

    #[test]
    fn ivfflat_index_statement() {
        let sql = create_index(
            "public.docs",
            &IndexSpec::IvfFlat { lists: 50 },
            DistanceMetric::L2,
        );
        assert_eq!(
            sql,
            "CREATE INDEX IF NOT EXISTS docs_embedding_ivfflat_l2_idx ON public.docs \
             USING ivfflat (embedding vector_l2_ops) WITH (lists = 50)"
        );
    }

    #[test]
    fn index_names_differ_per_metric() {
        let spec = IndexSpec::hnsw();
        assert_ne!(
            index_name("docs", &spec, DistanceMetric::L2),
            index_name("docs", &spec, DistanceMetric::InnerProduct)
        );
    }
}
