//! Lab Streaming Layer (LSL) compatible inlets
//!
//! The decoder consumes two LSL-style streams: a multichannel EEG stream
//! and an irregular string stream carrying stimulus markers.
//!
//! # Protocol
//!
//! Discovery is a multicast UDP query (`LSL:shortinfo`) answered by each
//! outlet with a JSON description including its TCP data port. On connect
//! the outlet sends `LSL:streaminfo/<len>:` followed by `<len>` bytes of
//! stream-info XML, then a sequence of frames:
//!
//! ```text
//! numeric:  [timestamp: f64 LE][value: channel_count × (f32|f64|i32|i16) LE]
//! string:   [timestamp: f64 LE][len: u32 LE][payload: len bytes UTF-8]
//! ```

use std::collections::HashSet;
use std::io::{ErrorKind, Read};
use std::net::{IpAddr, SocketAddr, TcpStream, UdpSocket};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::Deserialize;
use tracing::{debug, info};

use crate::bridge::source::{MarkerSource, SampleSource};
use crate::error::{SourceError, SourceResult};

/// Default multicast address for LSL discovery
pub const LSL_MULTICAST_ADDR: &str = "224.0.0.183";

/// Default multicast port
pub const LSL_MULTICAST_PORT: u16 = 16571;

/// Stream-info header prefix
const HEADER_PREFIX: &[u8] = b"LSL:streaminfo/";

/// Time allowed for the stream-info header after connecting
const HEADER_TIMEOUT: Duration = Duration::from_secs(5);

/// Socket timeouts must be non-zero
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// Bytes read per socket call
const READ_CHUNK: usize = 8192;

/// Longest string payload accepted on a marker stream
const MAX_MARKER_LEN: usize = 64 * 1024;

/// Local clock in seconds, shared by every stream on this host
#[must_use]
pub fn lsl_local_clock() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Stream content type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    /// Electroencephalography
    Eeg,
    /// Markers/events
    Markers,
    /// Anything else
    Data,
}

impl StreamType {
    /// Get type string for LSL XML
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eeg => "EEG",
            Self::Markers => "Markers",
            Self::Data => "Data",
        }
    }

    /// Classify a type string from a stream description
    #[must_use]
    pub fn from_type_str(s: &str) -> Self {
        if s.eq_ignore_ascii_case("EEG") {
            Self::Eeg
        } else if s.eq_ignore_ascii_case("Markers") {
            Self::Markers
        } else {
            Self::Data
        }
    }
}

/// Channel data format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelFormat {
    /// 32-bit float (most common)
    Float32,
    /// 64-bit float
    Float64,
    /// 32-bit integer
    Int32,
    /// 16-bit integer
    Int16,
    /// String (for markers)
    String,
}

impl ChannelFormat {
    /// Format name as it appears in stream-info XML
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Float32 => "float32",
            Self::Float64 => "double64",
            Self::Int32 => "int32",
            Self::Int16 => "int16",
            Self::String => "string",
        }
    }

    /// Parse an XML format name
    #[must_use]
    pub fn from_xml_name(s: &str) -> Option<Self> {
        match s {
            "float32" => Some(Self::Float32),
            "double64" | "float64" => Some(Self::Float64),
            "int32" => Some(Self::Int32),
            "int16" => Some(Self::Int16),
            "string" => Some(Self::String),
            _ => None,
        }
    }

    /// Get bytes per value (0 for variable-length strings)
    #[must_use]
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            Self::Float32 | Self::Int32 => 4,
            Self::Float64 => 8,
            Self::Int16 => 2,
            Self::String => 0,
        }
    }

    /// Decode one little-endian value of this format
    fn decode(self, bytes: &[u8]) -> f64 {
        match (self, bytes) {
            (Self::Float32, &[a, b, c, d]) => f64::from(f32::from_le_bytes([a, b, c, d])),
            (Self::Int32, &[a, b, c, d]) => f64::from(i32::from_le_bytes([a, b, c, d])),
            (Self::Int16, &[a, b]) => f64::from(i16::from_le_bytes([a, b])),
            (Self::Float64, &[a, b, c, d, e, f, g, h]) => f64::from_le_bytes([a, b, c, d, e, f, g, h]),
            _ => f64::NAN,
        }
    }
}

// ============================================================================
// Stream Info
// ============================================================================

/// Stream metadata
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    /// Stream name
    pub name: String,
    /// Stream type
    pub stream_type: StreamType,
    /// Number of channels
    pub channel_count: usize,
    /// Nominal sample rate (Hz), 0 for irregular
    pub nominal_srate: f64,
    /// Channel data format
    pub channel_format: ChannelFormat,
    /// Unique source ID
    pub source_id: String,
    /// Hostname
    pub hostname: String,
}

impl StreamInfo {
    /// Parse the stream-info XML sent after connecting.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::InvalidHeader`] if a required element is
    /// missing or malformed.
    pub fn from_xml(xml: &str) -> SourceResult<Self> {
        let required = |name: &str| {
            xml_element(xml, name)
                .ok_or_else(|| SourceError::InvalidHeader(format!("missing <{name}>")))
        };
        let channel_count = required("channel_count")?
            .parse::<usize>()
            .map_err(|e| SourceError::InvalidHeader(format!("channel_count: {e}")))?;
        let nominal_srate = required("nominal_srate")?
            .parse::<f64>()
            .map_err(|e| SourceError::InvalidHeader(format!("nominal_srate: {e}")))?;
        let format_name = required("channel_format")?;
        let channel_format = ChannelFormat::from_xml_name(format_name)
            .ok_or_else(|| SourceError::InvalidHeader(format!("unsupported channel_format {format_name}")))?;

        Ok(Self {
            name: required("name")?.to_string(),
            stream_type: StreamType::from_type_str(required("type")?),
            channel_count,
            nominal_srate,
            channel_format,
            source_id: xml_element(xml, "source_id").unwrap_or_default().to_string(),
            hostname: xml_element(xml, "hostname").unwrap_or_default().to_string(),
        })
    }
}

/// Text of the first `<name>...</name>` element
fn xml_element<'a>(xml: &'a str, name: &str) -> Option<&'a str> {
    let open = format!("<{name}>");
    let close = format!("</{name}>");
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    Some(xml[start..end].trim())
}

// ============================================================================
// Discovery
// ============================================================================

/// A stream found by discovery
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredStream {
    /// Stream name
    pub name: String,
    /// Stream type
    pub stream_type: StreamType,
    /// Number of channels
    pub channel_count: usize,
    /// Nominal sample rate (Hz)
    pub nominal_srate: f64,
    /// Unique source ID
    pub source_id: String,
    /// TCP data address
    pub address: SocketAddr,
}

#[derive(Deserialize)]
struct ShortInfo {
    name: String,
    #[serde(rename = "type")]
    stream_type: String,
    channel_count: usize,
    nominal_srate: f64,
    #[serde(default)]
    source_id: String,
    port: u16,
}

/// Parse a discovery response from `responder`
fn parse_discovery_response(response: &str, responder: IpAddr) -> Option<DiscoveredStream> {
    let json = response.strip_prefix("LSL:shortinfo")?.trim_start();
    let info: ShortInfo = serde_json::from_str(json).ok()?;
    Some(DiscoveredStream {
        name: info.name,
        stream_type: StreamType::from_type_str(&info.stream_type),
        channel_count: info.channel_count,
        nominal_srate: info.nominal_srate,
        source_id: info.source_id,
        address: SocketAddr::new(responder, info.port),
    })
}

/// Resolve streams of `stream_type` on the network, waiting up to `timeout`.
///
/// # Errors
///
/// Returns [`SourceError::NoStreamsFound`] if nothing of that type answers,
/// or [`SourceError::Io`] on socket failure.
pub fn resolve_streams(stream_type: StreamType, timeout: Duration) -> SourceResult<Vec<DiscoveredStream>> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    let multicast: SocketAddr = SocketAddr::new(
        LSL_MULTICAST_ADDR
            .parse()
            .map_err(|_| SourceError::InvalidHeader("Invalid multicast address".to_string()))?,
        LSL_MULTICAST_PORT,
    );
    socket.send_to(b"LSL:shortinfo", multicast)?;

    let deadline = Instant::now() + timeout;
    let mut seen = HashSet::new();
    let mut streams = Vec::new();
    let mut buf = [0u8; 4096];

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        socket.set_read_timeout(Some(remaining.max(MIN_READ_TIMEOUT)))?;
        match socket.recv_from(&mut buf) {
            Ok((n, from)) => {
                let Ok(response) = std::str::from_utf8(&buf[..n]) else { continue };
                match parse_discovery_response(response, from.ip()) {
                    Some(stream) if stream.stream_type == stream_type => {
                        if seen.insert((stream.source_id.clone(), stream.address)) {
                            debug!(name = %stream.name, address = %stream.address, "Discovered stream");
                            streams.push(stream);
                        }
                    }
                    _ => {}
                }
            }
            Err(ref e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => break,
            Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    if streams.is_empty() {
        Err(SourceError::NoStreamsFound { stream_type: stream_type.as_str().to_string() })
    } else {
        Ok(streams)
    }
}

// ============================================================================
// Inlet
// ============================================================================

/// LSL data inlet (data receiver)
pub struct LslInlet {
    info: StreamInfo,
    stream: TcpStream,
    /// Received bytes not yet decoded
    pending: Vec<u8>,
    last_timestamp: Option<f64>,
}

impl LslInlet {
    /// Connect to an outlet and read its stream-info header.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Io`] if the connection fails and
    /// [`SourceError::InvalidHeader`] if the header is malformed or late.
    pub fn connect(addr: SocketAddr) -> SourceResult<Self> {
        let stream = TcpStream::connect_timeout(&addr, HEADER_TIMEOUT)?;
        stream.set_nodelay(true)?;

        let mut inlet = Self {
            info: StreamInfo {
                name: String::new(),
                stream_type: StreamType::Data,
                channel_count: 0,
                nominal_srate: 0.0,
                channel_format: ChannelFormat::Float32,
                source_id: String::new(),
                hostname: String::new(),
            },
            stream,
            pending: Vec::new(),
            last_timestamp: None,
        };

        let deadline = Instant::now() + HEADER_TIMEOUT;
        inlet.info = loop {
            if let Some(info) = take_header(&mut inlet.pending)? {
                break info;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(SourceError::InvalidHeader("timed out waiting for stream info".to_string()));
            }
            inlet.fill(remaining)?;
        };

        info!(
            name = %inlet.info.name,
            stream_type = inlet.info.stream_type.as_str(),
            channels = inlet.info.channel_count,
            srate = inlet.info.nominal_srate,
            "Connected to LSL stream"
        );
        Ok(inlet)
    }

    /// Resolve the first stream of `stream_type` and connect to it.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::NoStreamsFound`] if discovery finds nothing,
    /// or any connection error.
    pub fn resolve_and_connect(stream_type: StreamType, timeout: Duration) -> SourceResult<Self> {
        let streams = resolve_streams(stream_type, timeout)?;
        let mut last_err = None;
        for candidate in streams {
            match Self::connect(candidate.address) {
                Ok(inlet) => return Ok(inlet),
                Err(err) => {
                    debug!(%err, name = %candidate.name, "Connection attempt failed");
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or(SourceError::NoStreamsFound {
            stream_type: stream_type.as_str().to_string(),
        }))
    }

    /// Get stream info
    #[must_use]
    pub fn info(&self) -> &StreamInfo {
        &self.info
    }

    /// Timestamp of the last decoded frame
    #[must_use]
    pub fn last_timestamp(&self) -> Option<f64> {
        self.last_timestamp
    }

    /// Read whatever arrives within `timeout` into `pending`.
    /// Returns false on timeout.
    fn fill(&mut self, timeout: Duration) -> SourceResult<bool> {
        self.stream.set_read_timeout(Some(timeout.max(MIN_READ_TIMEOUT)))?;
        let mut buf = [0u8; READ_CHUNK];
        match self.stream.read(&mut buf) {
            Ok(0) => Err(SourceError::Disconnected),
            Ok(n) => {
                self.pending.extend_from_slice(&buf[..n]);
                Ok(true)
            }
            Err(ref e)
                if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted) =>
            {
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn ensure_format(&self, numeric: bool) -> SourceResult<()> {
        let is_string = self.info.channel_format == ChannelFormat::String;
        if numeric == is_string {
            return Err(SourceError::FormatMismatch {
                name: self.info.name.clone(),
                found: self.info.channel_format.as_str(),
                expected: if numeric { "numeric" } else { "string" },
            });
        }
        Ok(())
    }

    /// Decode one string frame from `pending`, if complete
    fn take_marker(&mut self) -> SourceResult<Option<(String, f64)>> {
        if self.pending.len() < 12 {
            return Ok(None);
        }
        let timestamp = read_f64(&self.pending[..8]);
        let len = u32::from_le_bytes([self.pending[8], self.pending[9], self.pending[10], self.pending[11]]) as usize;
        if len > MAX_MARKER_LEN {
            return Err(SourceError::InvalidHeader(format!("marker payload of {len} bytes")));
        }
        if self.pending.len() < 12 + len {
            return Ok(None);
        }
        let payload = String::from_utf8_lossy(&self.pending[12..12 + len]).into_owned();
        self.pending.drain(..12 + len);
        self.last_timestamp = Some(timestamp);
        Ok(Some((payload, timestamp)))
    }
}

impl SampleSource for LslInlet {
    fn sample_rate(&self) -> f64 {
        self.info.nominal_srate
    }

    fn channel_count(&self) -> usize {
        self.info.channel_count
    }

    fn pull_chunk(&mut self, timeout: Duration) -> SourceResult<Vec<Vec<f64>>> {
        self.ensure_format(true)?;
        let width = self.info.channel_format.bytes_per_sample();
        let frame_len = 8 + width * self.info.channel_count;

        if self.pending.len() < frame_len {
            self.fill(timeout)?;
        }

        let frames = self.pending.len() / frame_len;
        let format = self.info.channel_format;
        let mut chunk = Vec::with_capacity(frames);
        for frame in self.pending.chunks_exact(frame_len).take(frames) {
            self.last_timestamp = Some(read_f64(&frame[..8]));
            chunk.push(frame[8..].chunks_exact(width).map(|b| format.decode(b)).collect());
        }
        self.pending.drain(..frames * frame_len);
        Ok(chunk)
    }

    fn clock(&self) -> f64 {
        lsl_local_clock()
    }
}

impl MarkerSource for LslInlet {
    fn pull_marker(&mut self, timeout: Duration) -> SourceResult<Option<(String, f64)>> {
        self.ensure_format(false)?;
        if let Some(marker) = self.take_marker()? {
            return Ok(Some(marker));
        }
        if self.fill(timeout)? {
            return self.take_marker();
        }
        Ok(None)
    }
}

fn read_f64(bytes: &[u8]) -> f64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[..8]);
    f64::from_le_bytes(raw)
}

/// Parse and consume the stream-info header from `pending`, if complete
fn take_header(pending: &mut Vec<u8>) -> SourceResult<Option<StreamInfo>> {
    let bad = |reason: &str| SourceError::InvalidHeader(reason.to_string());

    if pending.len() < HEADER_PREFIX.len() {
        return if HEADER_PREFIX.starts_with(pending) { Ok(None) } else { Err(bad("missing LSL:streaminfo prefix")) };
    }
    if !pending.starts_with(HEADER_PREFIX) {
        return Err(bad("missing LSL:streaminfo prefix"));
    }

    let rest = &pending[HEADER_PREFIX.len()..];
    let Some(colon) = rest.iter().position(|&b| b == b':') else {
        return if rest.len() > 20 { Err(bad("unterminated header length")) } else { Ok(None) };
    };
    let len: usize = std::str::from_utf8(&rest[..colon])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| bad("bad header length"))?;

    let start = HEADER_PREFIX.len() + colon + 1;
    if pending.len() < start + len {
        return Ok(None);
    }
    let xml = std::str::from_utf8(&pending[start..start + len]).map_err(|_| bad("header is not UTF-8"))?;
    let info = StreamInfo::from_xml(xml)?;
    pending.drain(..start + len);
    Ok(Some(info))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpListener;
    use std::thread;

    fn xml(stream_type: &str, channels: usize, srate: f64, format: &str) -> String {
        format!(
            "<?xml version=\"1.0\"?>\n<info>\n  <name>Test{stream_type}</name>\n  <type>{stream_type}</type>\n  \
             <channel_count>{channels}</channel_count>\n  <nominal_srate>{srate}</nominal_srate>\n  \
             <channel_format>{format}</channel_format>\n  <source_id>test-1</source_id>\n  \
             <desc><channels><channel><type>EEG</type></channel></channels></desc>\n</info>\n"
        )
    }

    /// Serve `header` followed by `body` to the first client
    fn serve(header_xml: String, body: Vec<u8>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            let (mut client, _) = listener.accept().unwrap();
            client.write_all(format!("LSL:streaminfo/{}:", header_xml.len()).as_bytes()).unwrap();
            client.write_all(header_xml.as_bytes()).unwrap();
            client.write_all(&body).unwrap();
            // Hold the connection open briefly so reads see data, not EOF
            thread::sleep(Duration::from_millis(300));
        });
        addr
    }

    #[test]
    fn test_stream_info_from_xml() {
        let info = StreamInfo::from_xml(&xml("EEG", 8, 250.0, "float32")).unwrap();
        assert_eq!(info.name, "TestEEG");
        assert_eq!(info.stream_type, StreamType::Eeg);
        assert_eq!(info.channel_count, 8);
        assert_eq!(info.nominal_srate, 250.0);
        assert_eq!(info.channel_format, ChannelFormat::Float32);
        assert_eq!(info.source_id, "test-1");

        assert!(StreamInfo::from_xml("<info><name>x</name></info>").is_err());
    }

    #[test]
    fn test_channel_format() {
        assert_eq!(ChannelFormat::Float32.bytes_per_sample(), 4);
        assert_eq!(ChannelFormat::Float64.bytes_per_sample(), 8);
        assert_eq!(ChannelFormat::Int16.bytes_per_sample(), 2);
        assert_eq!(ChannelFormat::from_xml_name("double64"), Some(ChannelFormat::Float64));
        assert_eq!(ChannelFormat::Int16.decode(&(-3i16).to_le_bytes()), -3.0);
    }

    #[test]
    fn test_discovery_response() {
        let ip: IpAddr = "10.0.0.5".parse().unwrap();
        let response = r#"LSL:shortinfo {"name":"OpenBCI","type":"EEG","channel_count":8,"nominal_srate":250,"source_id":"abc","hostname":"h","port":16572}"#;
        let stream = parse_discovery_response(response, ip).unwrap();
        assert_eq!(stream.stream_type, StreamType::Eeg);
        assert_eq!(stream.channel_count, 8);
        assert_eq!(stream.address, SocketAddr::new(ip, 16572));

        assert!(parse_discovery_response("LSL:fullinfo {}", ip).is_none());
        assert!(parse_discovery_response("LSL:shortinfo {not json", ip).is_none());
    }

    #[test]
    fn test_header_split_across_reads() {
        let header = xml("Markers", 1, 0.0, "string");
        let full = format!("LSL:streaminfo/{}:{header}", header.len()).into_bytes();

        let mut pending = full[..10].to_vec();
        assert_eq!(take_header(&mut pending).unwrap(), None);
        pending.extend_from_slice(&full[10..full.len() - 5]);
        assert_eq!(take_header(&mut pending).unwrap(), None);
        pending.extend_from_slice(&full[full.len() - 5..]);
        pending.extend_from_slice(b"rest");
        let info = take_header(&mut pending).unwrap().unwrap();
        assert_eq!(info.stream_type, StreamType::Markers);
        assert_eq!(pending, b"rest");

        let mut garbage = b"HTTP/1.1 200 OK\r\n".to_vec();
        assert!(take_header(&mut garbage).is_err());
    }

    #[test]
    fn test_inlet_pulls_sample_frames() {
        let mut body = Vec::new();
        for i in 0..3 {
            body.extend_from_slice(&(100.0 + f64::from(i)).to_le_bytes());
            body.extend_from_slice(&(i as f32).to_le_bytes());
            body.extend_from_slice(&(-(i as f32)).to_le_bytes());
        }
        let addr = serve(xml("EEG", 2, 250.0, "float32"), body);

        let mut inlet = LslInlet::connect(addr).unwrap();
        assert_eq!(inlet.channel_count(), 2);
        assert_eq!(inlet.sample_rate(), 250.0);

        let mut samples = Vec::new();
        for _ in 0..20 {
            samples.extend(inlet.pull_chunk(Duration::from_millis(50)).unwrap());
            if samples.len() == 3 {
                break;
            }
        }
        assert_eq!(samples, vec![vec![0.0, -0.0], vec![1.0, -1.0], vec![2.0, -2.0]]);
        assert_eq!(inlet.last_timestamp(), Some(102.0));
        assert!(inlet.pull_marker(Duration::from_millis(1)).is_err());
    }

    #[test]
    fn test_inlet_pulls_markers() {
        let mut body = Vec::new();
        for (ts, payload) in [(5.0f64, "TRIAL_START|12.0"), (9.0, "TRIAL_END|12.0")] {
            body.extend_from_slice(&ts.to_le_bytes());
            body.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            body.extend_from_slice(payload.as_bytes());
        }
        let addr = serve(xml("Markers", 1, 0.0, "string"), body);

        let mut inlet = LslInlet::connect(addr).unwrap();
        let mut markers = Vec::new();
        for _ in 0..20 {
            if let Some(m) = inlet.pull_marker(Duration::from_millis(50)).unwrap() {
                markers.push(m);
            }
            if markers.len() == 2 {
                break;
            }
        }
        assert_eq!(
            markers,
            vec![("TRIAL_START|12.0".to_string(), 5.0), ("TRIAL_END|12.0".to_string(), 9.0)]
        );
        assert!(inlet.pull_chunk(Duration::from_millis(1)).is_err());
    }
}
