use std::collections::HashMap;

use handshake::core::{Chunk, DistanceMetric, Handshake, HandshakeError, IndexSpec};
use handshake::qdrant::{QdrantHandshake, QdrantHandshakeConfig};

#[tokio::main]
async fn main() -> Result<(), HandshakeError> {
    tracing_subscriber::fmt::init();

    // In-memory Qdrant with deterministic embeddings: no server or API key needed.
    let config = QdrantHandshakeConfig::new("auto", "fake/32").with_distance(DistanceMetric::Cosine);
    let handshake = QdrantHandshake::new(config).await?;
    println!(
        "collection {} ({} dims)",
        handshake.destination_name(),
        handshake.dimension()
    );

    let text = "Rust is a systems language. Qdrant stores vectors. Postgres stores rows.";
    let chunks: Vec<Chunk> = text
        .split_inclusive(". ")
        .scan(0, |offset, sentence| {
            let start = *offset;
            *offset += sentence.len();
            let tokens = sentence.split_whitespace().count();
            Some(
                Chunk::new(sentence.trim(), start, *offset, tokens).with_metadata(HashMap::from([(
                    "source".to_string(),
                    "quickstart".into(),
                )])),
            )
        })
        .collect();

    let ids = handshake.write(&chunks).await?;
    println!("wrote {} chunks", ids.len());

    handshake
        .create_index(IndexSpec::hnsw(), DistanceMetric::Cosine)
        .await?;

    for hit in handshake
        .search("Qdrant stores vectors.", 2, DistanceMetric::Cosine)
        .await?
    {
        println!("{:.4}  [{}..{}]  {}", hit.distance, hit.start_index, hit.end_index, hit.text);
    }

    handshake.close().await
}
