use std::io::BufRead;

use crate::{
    error::Result,
    model::Dataset,
    producer::{StreamingProducer, TableStream},
    resource::Resource,
};

use super::{DataSetFormat, FormatStrategy, ParseContext};

fn producer<'r>(
    resource: &'r Resource,
    ctx: &ParseContext<'_>,
) -> Result<StreamingProducer<Box<dyn BufRead + 'r>>> {
    let options = ctx.options;
    let reader = resource.reader(options.encoding.as_deref())?;
    Ok(StreamingProducer::new(reader, resource.location())
        .with_case_sensitivity(options.case_sensitivity())
        .with_column_sensing(options.column_sensing)
        .with_dtd_metadata(options.dtd_metadata)
        .with_schema_source(ctx.schema_source.cloned())
        .with_cache(ctx.new_cache()))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FlatXmlFormat;

impl FormatStrategy for FlatXmlFormat {
    fn format(&self) -> DataSetFormat {
        DataSetFormat::Flat
    }

    fn parse(&self, resource: &Resource, ctx: &ParseContext<'_>) -> Result<Dataset> {
        producer(resource, ctx)?.produce_dataset()
    }
}

/// Flat XML read lazily, one table at a time.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamingFormat;

impl StreamingFormat {
    pub fn stream<'r>(
        &self,
        resource: &'r Resource,
        ctx: &ParseContext<'_>,
    ) -> Result<TableStream<Box<dyn BufRead + 'r>>> {
        Ok(TableStream::new(producer(resource, ctx)?))
    }
}

impl FormatStrategy for StreamingFormat {
    fn format(&self) -> DataSetFormat {
        DataSetFormat::Streaming
    }

    fn parse(&self, resource: &Resource, ctx: &ParseContext<'_>) -> Result<Dataset> {
        self.stream(resource, ctx)?.into_dataset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::FormatOptions, model::DataSet};

    const FIXTURE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<dataset>
    <USERS ID="1" NAME="Ann"/>
    <ORDERS ID="10" USER_ID="1"/>
    <USERS ID="2" NAME="Bob" OPTIONAL="x"/>
</dataset>"#;

    #[test]
    fn streaming_and_flat_parses_agree() {
        let resource = Resource::from_bytes("fixture.xml", FIXTURE);
        let options = FormatOptions {
            column_sensing: true,
            ..FormatOptions::default()
        };
        let ctx = ParseContext::new(&options);
        let flat = FlatXmlFormat.parse(&resource, &ctx).unwrap();
        let streamed = StreamingFormat.parse(&resource, &ctx).unwrap();
        assert_eq!(flat, streamed);
        assert_eq!(flat.table_names(), vec!["USERS", "ORDERS"]);
        assert_eq!(flat.table("USERS").unwrap().value(1, "OPTIONAL").unwrap(), Some("x"));
    }

    #[test]
    fn interning_does_not_change_results() {
        let resource = Resource::from_bytes("fixture.xml", FIXTURE);
        let with = FormatOptions::default();
        let without = FormatOptions {
            interning: false,
            ..FormatOptions::default()
        };
        let left = FlatXmlFormat.parse(&resource, &ParseContext::new(&with)).unwrap();
        let right = FlatXmlFormat.parse(&resource, &ParseContext::new(&without)).unwrap();
        assert_eq!(left, right);
    }

    #[test]
    fn stream_yields_continuation_chunks() {
        let resource = Resource::from_bytes("fixture.xml", FIXTURE);
        let options = FormatOptions::default();
        let names = StreamingFormat
            .stream(&resource, &ParseContext::new(&options))
            .unwrap()
            .map(|table| table.map(|t| t.name().to_string()))
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(names, vec!["USERS", "ORDERS", "USERS"]);
    }

    #[test]
    fn stream_reads_files_from_disk() {
        use crate::resource::{FileSystemResolver, ResourceResolver};

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("fixture.xml"), FIXTURE).unwrap();
        let resource = FileSystemResolver::new(dir.path())
            .resolve("fixture.xml")
            .unwrap()
            .remove(0);
        assert!(resource.bytes().is_none());

        let options = FormatOptions::default();
        let mut stream = StreamingFormat
            .stream(&resource, &ParseContext::new(&options))
            .unwrap();
        let first = stream.next().unwrap().unwrap();
        assert_eq!(first.name(), "USERS");
        assert_eq!(first.row_count(), 1);
        assert_eq!(stream.count(), 2);
    }
}
