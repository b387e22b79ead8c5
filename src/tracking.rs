// 🔗 Tracking Parameter Extractor
// Reads a TSV list of landing-page URLs and pulls the ad-tracking parameters
// out of each query string into a TSV of named columns.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;
use tracing::{debug, info};
use url::Url;

// ============================================================================
// PARAMETER CATALOG
// ============================================================================

/// One query-string key and the column it lands in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingParameter {
    pub query_key: String,
    pub column: String,
}

impl TrackingParameter {
    pub fn new(query_key: &str, column: &str) -> Self {
        TrackingParameter {
            query_key: query_key.to_string(),
            column: column.to_string(),
        }
    }
}

/// Default parameters, in output-column order
pub fn default_parameters() -> Vec<TrackingParameter> {
    vec![
        TrackingParameter::new("a_bucket", "ad_bucket"),
        TrackingParameter::new("a_type", "ad_type"),
        TrackingParameter::new("a_source", "ad_source"),
        TrackingParameter::new("a_v", "schema_version"),
        TrackingParameter::new("a_g_campaignid", "ad_campaign_id"),
        TrackingParameter::new("a_g_keyword", "ad_keyword"),
        TrackingParameter::new("a_g_adgroupid", "ad_group_id"),
        TrackingParameter::new("a_g_creative", "ad_creative"),
    ]
}

// ============================================================================
// RECORDS
// ============================================================================

/// A URL read from the input file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUrl {
    pub url: String,

    /// Line in the original file (header is line 1)
    pub line_number: usize,
}

/// Extracted values for one URL, aligned with the extractor's parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackingRecord {
    pub url: String,
    pub line_number: usize,
    pub values: Vec<String>,
}

// ============================================================================
// EXTRACTOR
// ============================================================================

pub struct TrackingExtractor {
    parameters: Vec<TrackingParameter>,
}

impl TrackingExtractor {
    /// Create extractor with the default ad-tracking parameters
    pub fn new() -> Self {
        TrackingExtractor {
            parameters: default_parameters(),
        }
    }

    pub fn with_parameters(parameters: Vec<TrackingParameter>) -> Self {
        TrackingExtractor { parameters }
    }

    /// Output header row
    pub fn columns(&self) -> Vec<&str> {
        self.parameters.iter().map(|p| p.column.as_str()).collect()
    }

    /// Extract every parameter from one URL; missing or blank keys give ""
    pub fn parse_url(&self, url: &str) -> Vec<String> {
        let query = query_string(url).unwrap_or_default();
        let pairs: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect();

        self.parameters
            .iter()
            .map(|param| {
                pairs
                    .iter()
                    .find(|(key, value)| *key == param.query_key && !value.is_empty())
                    .map(|(_, value)| value.clone())
                    .unwrap_or_default()
            })
            .collect()
    }

    /// Read URLs from the first column of a TSV with a header row
    pub fn read_urls(&self, input: &Path) -> Result<Vec<SourceUrl>> {
        let file = File::open(input)
            .with_context(|| format!("Failed to open file: {}", input.display()))?;

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .delimiter(b'\t')
            .flexible(true)
            .from_reader(file);

        let mut urls = Vec::new();

        for (line_num, result) in reader.records().enumerate() {
            let record = result.with_context(|| {
                format!("Failed to parse TSV line {} in {}", line_num + 2, input.display())
            })?;

            let url = record.get(0).unwrap_or("").trim();
            if url.is_empty() {
                continue;
            }

            urls.push(SourceUrl {
                url: url.to_string(),
                line_number: line_num + 2, // +2 because: 1-indexed + header row
            });
        }

        Ok(urls)
    }

    pub fn extract(&self, urls: &[SourceUrl]) -> Vec<TrackingRecord> {
        urls.iter()
            .map(|source| {
                let values = self.parse_url(&source.url);
                debug!("Line {}: {:?}", source.line_number, values);
                TrackingRecord {
                    url: source.url.clone(),
                    line_number: source.line_number,
                    values,
                }
            })
            .collect()
    }

    /// Write header plus one row per record as TSV
    pub fn write_records(&self, output: &Path, records: &[TrackingRecord]) -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_path(output)
            .with_context(|| format!("Failed to create file: {}", output.display()))?;

        writer.write_record(self.columns())?;
        for record in records {
            if record.values.iter().all(String::is_empty) {
                debug!(
                    "Line {}: no tracking parameters in {}",
                    record.line_number, record.url
                );
            }
            writer.write_record(&record.values)?;
        }
        writer
            .flush()
            .with_context(|| format!("Failed to write {}", output.display()))?;

        Ok(())
    }

    /// Read `input`, extract, write `output`; returns the number of URLs
    pub fn extract_file(&self, input: &Path, output: &Path) -> Result<usize> {
        let urls = self.read_urls(input)?;
        let records = self.extract(&urls);
        self.write_records(output, &records)?;

        info!(
            "Extracted tracking parameters for {} URLs into {}",
            records.len(),
            output.display()
        );
        Ok(records.len())
    }
}

impl Default for TrackingExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Raw query string of a URL, with or without a scheme
fn query_string(url: &str) -> Option<String> {
    if let Ok(parsed) = Url::parse(url) {
        return parsed.query().map(str::to_string);
    }

    // Relative URLs: take what sits between '?' and '#'
    let (_, rest) = url.split_once('?')?;
    let query = rest.split('#').next().unwrap_or("");
    Some(query.to_string())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const FULL_URL: &str = "https://www.example.com/pricing?a_bucket=search&a_type=paid\
        &a_source=google&a_v=2&a_g_campaignid=123&a_g_keyword=sms+api\
        &a_g_adgroupid=456&a_g_creative=789#top";

    #[test]
    fn test_parse_full_url() {
        let extractor = TrackingExtractor::new();

        assert_eq!(
            extractor.parse_url(FULL_URL),
            vec!["search", "paid", "google", "2", "123", "sms api", "456", "789"]
        );
    }

    #[test]
    fn test_missing_parameters_are_empty() {
        let extractor = TrackingExtractor::new();
        let values = extractor.parse_url("https://example.com/?a_type=display&utm_source=x");

        assert_eq!(values, vec!["", "display", "", "", "", "", "", ""]);
    }

    #[test]
    fn test_url_without_query() {
        let extractor = TrackingExtractor::new();
        assert_eq!(extractor.parse_url("https://example.com/"), vec![""; 8]);
        assert_eq!(extractor.parse_url("not a url"), vec![""; 8]);
    }

    #[test]
    fn test_percent_decoding() {
        let extractor = TrackingExtractor::new();
        let values = extractor.parse_url("https://example.com/?a_g_keyword=bulk%20sms%26mms");

        assert_eq!(values[5], "bulk sms&mms");
    }

    #[test]
    fn test_relative_url_fallback() {
        let extractor = TrackingExtractor::new();
        let values = extractor.parse_url("www.example.com/landing?a_bucket=b1&a_v=3#frag");

        assert_eq!(values[0], "b1");
        assert_eq!(values[3], "3");
    }

    #[test]
    fn test_repeated_key_first_non_empty() {
        let extractor = TrackingExtractor::new();
        let values = extractor.parse_url("https://example.com/?a_type=&a_type=video&a_type=text");

        assert_eq!(values[1], "video");
    }

    #[test]
    fn test_custom_parameters() {
        let extractor =
            TrackingExtractor::with_parameters(vec![TrackingParameter::new("utm_source", "source")]);

        assert_eq!(extractor.columns(), vec!["source"]);
        assert_eq!(
            extractor.parse_url("https://example.com/?utm_source=newsletter"),
            vec!["newsletter"]
        );
    }

    #[test]
    fn test_extract_file() {
        let mut input = tempfile::NamedTempFile::new().unwrap();
        writeln!(input, "url\tclicks").unwrap();
        writeln!(input, "{}\t3", FULL_URL).unwrap();
        writeln!(input).unwrap();
        writeln!(input, "https://example.com/?a_source=bing\t1").unwrap();

        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("solution.tsv");

        let extractor = TrackingExtractor::new();
        let count = extractor.extract_file(input.path(), &output).unwrap();

        assert_eq!(count, 2);
        let written = std::fs::read_to_string(&output).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            "ad_bucket\tad_type\tad_source\tschema_version\tad_campaign_id\tad_keyword\tad_group_id\tad_creative"
        );
        assert_eq!(lines[1], "search\tpaid\tgoogle\t2\t123\tsms api\t456\t789");
        assert_eq!(lines[2], "\t\tbing\t\t\t\t\t");
    }

    #[test]
    fn test_read_urls_tracks_line_numbers() {
        let mut input = tempfile::NamedTempFile::new().unwrap();
        writeln!(input, "url").unwrap();
        writeln!(input, "https://a.example/?a_v=1").unwrap();
        writeln!(input, "https://b.example/?a_v=2").unwrap();

        let urls = TrackingExtractor::new().read_urls(input.path()).unwrap();

        assert_eq!(urls.len(), 2);
        assert_eq!(urls[1].line_number, 3);
        assert_eq!(urls[1].url, "https://b.example/?a_v=2");
    }
}
