use std::io::{BufRead, BufReader, ErrorKind};
use std::time::Duration;

use log::{debug, info};
use serialport::SerialPort;

use crate::config::SerialConfig;
use crate::drivers::{SignalSource, SignalWindow, WindowAssembler};
use crate::error::ControlError;
use crate::stop::StopSignal;

const READ_TIMEOUT: Duration = Duration::from_millis(200);

/// Streaming EEG over a serial line.
///
/// The device sends one text line per sample frame with the channel values
/// separated by commas or whitespace. Lines that do not parse, including
/// lines with bytes that are not UTF-8, are skipped.
pub struct SerialSource<R = BufReader<Box<dyn SerialPort>>> {
    port_name: String,
    reader: R,
    assembler: WindowAssembler,
    stop: StopSignal,
    line: Vec<u8>,
}

impl SerialSource {
    pub fn open(
        cfg: &SerialConfig,
        sample_rate_hz: f64,
        n_channels: usize,
        window_samples: usize,
        stop: StopSignal,
    ) -> Result<Self, ControlError> {
        let port = serialport::new(&cfg.port, cfg.baud_rate)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|e| {
                ControlError::AcquisitionUnavailable(format!("serial port {}: {e}", cfg.port))
            })?;
        info!("[EEG] Connected to serial stream on {} @ {} baud.", cfg.port, cfg.baud_rate);
        let assembler = WindowAssembler::new(n_channels, sample_rate_hz, window_samples)?;
        Ok(SerialSource::from_reader(&cfg.port, BufReader::new(port), assembler, stop))
    }
}

impl<R: BufRead> SerialSource<R> {
    /// Reads frames from any line-oriented byte stream.
    pub fn from_reader(
        name: &str,
        reader: R,
        assembler: WindowAssembler,
        stop: StopSignal,
    ) -> Self {
        Self {
            port_name: name.to_owned(),
            reader,
            assembler,
            stop,
            line: Vec::new(),
        }
    }
}

impl<R: BufRead> SignalSource for SerialSource<R> {
    fn next_window(&mut self) -> Result<Option<SignalWindow>, ControlError> {
        loop {
            if let Some(window) = self.assembler.take_window()? {
                return Ok(Some(window));
            }
            if self.stop.is_triggered() {
                return Ok(None);
            }
            // partial lines survive a read timeout and are completed next pass
            match self.reader.read_until(b'\n', &mut self.line) {
                Ok(0) => {
                    return Err(ControlError::AcquisitionFailed(format!(
                        "serial stream {} closed",
                        self.port_name
                    )))
                }
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::Interrupted => {
                    continue
                }
                Err(e) => return Err(ControlError::AcquisitionFailed(e.to_string())),
            }
            let text = String::from_utf8_lossy(&self.line);
            match parse_sample_line(&text, self.assembler.num_channels()) {
                Some(frame) => self.assembler.push_frame(&frame)?,
                None => debug!("[EEG] skipping malformed line: {:?}", text.trim_end()),
            }
            self.line.clear();
        }
    }
}

/// Parses one frame. Extra trailing columns are ignored; a frame with fewer
/// than `n_channels` numeric values is rejected.
pub fn parse_sample_line(line: &str, n_channels: usize) -> Option<Vec<f64>> {
    let values: Vec<f64> = line
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|token| !token.is_empty())
        .take(n_channels)
        .map(|token| token.parse::<f64>().ok().filter(|v| v.is_finite()))
        .collect::<Option<_>>()?;
    (values.len() == n_channels).then_some(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parses_comma_and_space_separated_frames() {
        assert_eq!(
            parse_sample_line("1.5, -2,3e1\r\n", 3),
            Some(vec![1.5, -2.0, 30.0])
        );
        assert_eq!(parse_sample_line("1 2 3 4", 2), Some(vec![1.0, 2.0]));
    }
    #[test]
    fn rejects_short_or_garbled_frames() {
        assert_eq!(parse_sample_line("1.0,2.0", 3), None);
        assert_eq!(parse_sample_line("1.0,abc,3.0", 3), None);
        assert_eq!(parse_sample_line("", 1), None);
        assert_eq!(parse_sample_line("NaN,1", 2), None);
    }
    fn stream(bytes: &[u8], window_samples: usize) -> SerialSource<Cursor<Vec<u8>>> {
        let assembler = WindowAssembler::new(2, 250.0, window_samples).unwrap();
        SerialSource::from_reader("test", Cursor::new(bytes.to_vec()), assembler, StopSignal::new())
    }
    #[test]
    fn noise_bytes_are_skipped_not_fatal() {
        let mut bytes = b"\xff\xfe garbage\n".to_vec();
        bytes.extend_from_slice(b"1.0,\xc3\n");
        for i in 0..3 {
            bytes.extend_from_slice(format!("{i}.0,2.0\n").as_bytes());
        }
        let mut source = stream(&bytes, 3);
        let window = source.next_window().unwrap().unwrap();
        assert_eq!(window.channel(0).to_vec(), vec![0.0, 1.0, 2.0]);
        assert_eq!(window.channel(1).to_vec(), vec![2.0, 2.0, 2.0]);
    }
    #[test]
    fn end_of_stream_is_acquisition_failure() {
        let mut source = stream(b"1.0,2.0\n", 3);
        assert!(matches!(
            source.next_window(),
            Err(ControlError::AcquisitionFailed(_))
        ));
    }
    #[test]
    fn missing_port_is_acquisition_unavailable() {
        let cfg = SerialConfig {
            port: "/dev/does-not-exist-betaloop".into(),
            baud_rate: 115_200,
        };
        let result = SerialSource::open(&cfg, 250.0, 8, 250, StopSignal::new());
        assert!(matches!(result, Err(ControlError::AcquisitionUnavailable(_))));
    }
}
