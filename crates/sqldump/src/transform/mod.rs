//! Row transformers.
//!
//! Transformers form the middle pipeline stage. Each one rewrites the
//! schema once during initialization and then rewrites rows one at a
//! time; the chain threads the schema through every stage in order.

pub mod fake;
pub mod faker;
pub mod format;
pub mod template;

pub use fake::FakeDataTransformer;
pub use faker::{FakerDataset, FakerMethod, FakerRegistry};
pub use format::FormatDataTransformer;

use crate::core::schema::Schema;
use crate::core::DataTransformer;
use crate::error::Result;

/// Initialize a transformer chain, threading the schema through each
/// stage. Returns the final transform schema.
pub fn initialize_chain(
    transformers: &mut [Box<dyn DataTransformer>],
    input: &Schema,
) -> Result<Schema> {
    let mut schema = input.clone();
    for transformer in transformers.iter_mut() {
        schema = transformer.initialize(&schema)?;
    }
    Ok(schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{ColumnInfo, LogicalType};
    use crate::core::value::{Row, Value};
    use crate::options::{FakeOptions, FormatOptions};

    #[test]
    fn test_chain_threads_schema_between_stages() {
        // Fake introduces a virtual column; Format references it. The
        // format stage must see the cumulative schema, not the reader's.
        let fake = FakeDataTransformer::new(&FakeOptions {
            mappings: vec!["SCRATCH:name.firstname".to_string()],
            seed: Some(5),
            ..Default::default()
        });
        let format = FormatDataTransformer::new(&FormatOptions {
            mappings: vec!["GREETING:Hello {SCRATCH}".to_string()],
        });

        let mut chain: Vec<Box<dyn DataTransformer>> = vec![Box::new(fake), Box::new(format)];
        let input = Schema::new(vec![
            ColumnInfo::new("ID", LogicalType::Int32),
            ColumnInfo::new("GREETING", LogicalType::String),
        ])
        .unwrap();

        let out = initialize_chain(&mut chain, &input).unwrap();
        assert!(out.column("SCRATCH").unwrap().is_virtual);
        assert_eq!(out.without_virtual().len(), 2);

        let mut row: Row = vec![Value::I32(1), Value::Null];
        for t in chain.iter_mut() {
            row = t.transform(row).unwrap();
        }
        match &row[1] {
            Value::Text(s) => assert!(s.starts_with("Hello ")),
            other => panic!("expected text, got {:?}", other),
        }
    }
}
