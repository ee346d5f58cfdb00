use std::fmt;
use std::fmt::Write as _;

/// Numeric field value on a sink point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FieldValue {
    UInt(u64),
    Float(f64),
}

/// One timestamped measurement tuple accepted by the time-series backend.
#[derive(Clone, Debug, PartialEq)]
pub struct Point {
    pub measurement: &'static str,
    pub tags: Vec<(&'static str, String)>,
    pub fields: Vec<(&'static str, FieldValue)>,
    pub timestamp_ns: i64,
}

impl Point {
    /// Nanosecond timestamp from the node's seconds + microseconds pair.
    pub fn timestamp_from_parts(secs: u32, micros: u32) -> i64 {
        i64::from(secs) * 1_000_000_000 + i64::from(micros) * 1_000
    }
}

/// Sink write failures.
#[derive(Debug)]
pub enum SinkError {
    Http(Box<ureq::Error>),
    HttpStatus(u16),
}

impl From<ureq::Error> for SinkError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(code, _) => SinkError::HttpStatus(code),
            other => SinkError::Http(Box::new(other)),
        }
    }
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkError::Http(err) => write!(f, "sink transport error: {}", err),
            SinkError::HttpStatus(code) => write!(f, "sink rejected write with status {}", code),
        }
    }
}

impl std::error::Error for SinkError {}

/// Minimal append interface the pipeline depends on. Connection setup,
/// auth and batching policy live behind the implementation.
pub trait PointSink {
    fn write_point(&mut self, point: &Point) -> Result<(), SinkError>;
}

/// InfluxDB 2.x line-protocol writer.
pub struct InfluxWriter {
    agent: ureq::Agent,
    write_url: String,
    auth_header: String,
}

impl InfluxWriter {
    /// Build a writer for one org/bucket. `url` is the server base, e.g.
    /// `http://localhost:8086`.
    pub fn new(url: &str, org: &str, bucket: &str, token: &str) -> Self {
        let write_url = format!(
            "{}/api/v2/write?org={}&bucket={}&precision=ns",
            url.trim_end_matches('/'),
            org,
            bucket
        );
        Self {
            agent: ureq::Agent::new(),
            write_url,
            auth_header: format!("Token {}", token),
        }
    }
}

impl PointSink for InfluxWriter {
    fn write_point(&mut self, point: &Point) -> Result<(), SinkError> {
        let line = encode_line(point);
        self.agent
            .post(&self.write_url)
            .set("Authorization", &self.auth_header)
            .set("Content-Type", "text/plain; charset=utf-8")
            .send_string(&line)?;
        Ok(())
    }
}

/// Encode one point as an InfluxDB line-protocol record.
pub fn encode_line(point: &Point) -> String {
    let mut line = String::new();
    escape_into(&mut line, point.measurement, &[',', ' ']);
    for (key, value) in &point.tags {
        line.push(',');
        escape_into(&mut line, key, &[',', '=', ' ']);
        line.push('=');
        escape_into(&mut line, value, &[',', '=', ' ']);
    }
    line.push(' ');
    for (idx, (key, value)) in point.fields.iter().enumerate() {
        if idx > 0 {
            line.push(',');
        }
        escape_into(&mut line, key, &[',', '=', ' ']);
        line.push('=');
        match value {
            FieldValue::UInt(v) => {
                let _ = write!(line, "{}i", v);
            }
            FieldValue::Float(v) => {
                let _ = write!(line, "{}", v);
            }
        }
    }
    let _ = write!(line, " {}", point.timestamp_ns);
    line
}

/// Append `value` to `out`, backslash-escaping the given special characters.
fn escape_into(out: &mut String, value: &str, specials: &[char]) {
    for ch in value.chars() {
        if specials.contains(&ch) || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
}
