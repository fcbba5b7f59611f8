//! Fact index backed by LanceDB for nearest-neighbor retrieval

use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use lance_arrow::FixedSizeListArrayExt;
use lancedb::connect;
use lancedb::query::{ExecutableQuery, QueryBase};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::fact::{Fact, FactIndex, RetrievedFact};

const TABLE_NAME: &str = "facts";

/// LanceDB-backed fact index
pub struct LanceFactIndex {
    db: lancedb::Connection,
    dimensions: usize,
}

impl LanceFactIndex {
    /// Open the index, creating the table on first use
    pub async fn new(config: &Config) -> Result<Self> {
        let db = connect(config.fact_index_path().to_str().unwrap())
            .execute()
            .await
            .map_err(|e| Error::vector_db(e.to_string()))?;

        let index = Self {
            db,
            dimensions: config.embedding_dimensions,
        };

        index.ensure_table().await?;

        Ok(index)
    }

    /// Get the schema for the facts table
    fn schema(&self) -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("topic", DataType::Utf8, false),
            Field::new("text", DataType::Utf8, false),
            Field::new("source_url", DataType::Utf8, false),
            Field::new("created_at", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.dimensions as i32,
                ),
                false,
            ),
        ])
    }

    /// Ensure the facts table exists
    async fn ensure_table(&self) -> Result<()> {
        let tables = self
            .db
            .table_names()
            .execute()
            .await
            .map_err(|e| Error::vector_db(e.to_string()))?;

        if !tables.contains(&TABLE_NAME.to_string()) {
            let schema = Arc::new(self.schema());

            let empty_batch = RecordBatch::new_empty(schema.clone());
            let batches = vec![empty_batch];
            let reader = RecordBatchIterator::new(batches.into_iter().map(Ok), schema);

            self.db
                .create_table(TABLE_NAME, Box::new(reader))
                .execute()
                .await
                .map_err(|e| Error::vector_db(e.to_string()))?;
        }

        Ok(())
    }
}

#[async_trait]
impl FactIndex for LanceFactIndex {
    async fn add(&self, fact: &Fact) -> Result<()> {
        if fact.embedding.len() != self.dimensions {
            return Err(Error::vector_db(format!(
                "Embedding dimension mismatch: expected {}, got {}",
                self.dimensions,
                fact.embedding.len()
            )));
        }

        // Build arrays for the record batch
        let id_array = StringArray::from(vec![fact.id.to_string()]);
        let topic_array = StringArray::from(vec![fact.topic.clone()]);
        let text_array = StringArray::from(vec![fact.text.clone()]);
        let source_array = StringArray::from(vec![fact.source_url.clone()]);
        let created_array = StringArray::from(vec![fact.created_at.to_rfc3339()]);

        let values = Float32Array::from(fact.embedding.clone());
        let vector_array = FixedSizeListArray::try_new_from_values(values, self.dimensions as i32)
            .map_err(|e: arrow_schema::ArrowError| Error::vector_db(e.to_string()))?;

        let schema = Arc::new(self.schema());
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(id_array) as Arc<dyn Array>,
                Arc::new(topic_array),
                Arc::new(text_array),
                Arc::new(source_array),
                Arc::new(created_array),
                Arc::new(vector_array),
            ],
        )
        .map_err(|e| Error::vector_db(e.to_string()))?;

        let batches = vec![batch];
        let reader = RecordBatchIterator::new(batches.into_iter().map(Ok), schema);

        let table = self
            .db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .map_err(|e| Error::vector_db(e.to_string()))?;

        table
            .add(Box::new(reader))
            .execute()
            .await
            .map_err(|e| Error::vector_db(e.to_string()))?;

        Ok(())
    }

    async fn nearest(&self, query_vector: &[f32], k: usize) -> Result<Vec<RetrievedFact>> {
        let table = self
            .db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .map_err(|e: lancedb::Error| Error::vector_db(e.to_string()))?;

        let query = table
            .vector_search(query_vector.to_vec())
            .map_err(|e: lancedb::Error| Error::vector_db(e.to_string()))?
            .limit(k);

        let stream = query
            .execute()
            .await
            .map_err(|e: lancedb::Error| Error::vector_db(e.to_string()))?;

        let batches: Vec<RecordBatch> = stream
            .try_collect::<Vec<RecordBatch>>()
            .await
            .map_err(|e: lancedb::Error| Error::vector_db(e.to_string()))?;

        let mut facts = Vec::new();

        for batch in batches {
            let id_col: &Arc<dyn Array> = batch
                .column_by_name("id")
                .ok_or_else(|| Error::vector_db("Missing id column"))?;
            let topic_col: &Arc<dyn Array> = batch
                .column_by_name("topic")
                .ok_or_else(|| Error::vector_db("Missing topic column"))?;
            let text_col: &Arc<dyn Array> = batch
                .column_by_name("text")
                .ok_or_else(|| Error::vector_db("Missing text column"))?;
            let source_col: &Arc<dyn Array> = batch
                .column_by_name("source_url")
                .ok_or_else(|| Error::vector_db("Missing source_url column"))?;
            let distance_col: &Arc<dyn Array> = batch
                .column_by_name("_distance")
                .ok_or_else(|| Error::vector_db("Missing _distance column"))?;

            let ids = id_col
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| Error::vector_db("id column is not StringArray"))?;
            let topics = topic_col
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| Error::vector_db("topic column is not StringArray"))?;
            let texts = text_col
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| Error::vector_db("text column is not StringArray"))?;
            let sources = source_col
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| Error::vector_db("source_url column is not StringArray"))?;
            let distances = distance_col
                .as_any()
                .downcast_ref::<Float32Array>()
                .ok_or_else(|| Error::vector_db("_distance column is not Float32Array"))?;

            for i in 0..batch.num_rows() {
                facts.push(RetrievedFact {
                    id: Uuid::parse_str(ids.value(i))
                        .map_err(|e| Error::vector_db(e.to_string()))?,
                    topic: topics.value(i).to_string(),
                    text: texts.value(i).to_string(),
                    source_url: sources.value(i).to_string(),
                    distance: distances.value(i),
                });
            }
        }

        Ok(facts)
    }
}

use futures::TryStreamExt;
