//! Minimal XML helpers for SOAP envelopes.

use std::borrow::Cow;

use quick_xml::events::Event;
use quick_xml::reader::Reader;

use super::error::{GatewayError, GatewayResult};

pub fn escape(value: &str) -> Cow<'_, str> {
    quick_xml::escape::escape(value)
}

/// Text content of the first element whose local name is `name`, ignoring
/// namespace prefixes. `Ok(None)` when the element does not occur.
pub fn element_text(xml: &str, name: &str) -> GatewayResult<Option<String>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut inside = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) if start.local_name().as_ref() == name.as_bytes() => {
                inside = true;
            }
            Ok(Event::Empty(empty)) if empty.local_name().as_ref() == name.as_bytes() => {
                return Ok(Some(String::new()));
            }
            Ok(Event::Text(text)) if inside => {
                let text = text.unescape().map_err(|e| GatewayError::MalformedCallback {
                    message: format!("bad text in <{name}>: {e}"),
                })?;
                return Ok(Some(text.into_owned()));
            }
            Ok(Event::CData(data)) if inside => {
                return Ok(Some(String::from_utf8_lossy(&data.into_inner()).into_owned()));
            }
            Ok(Event::End(_)) if inside => return Ok(Some(String::new())),
            Ok(Event::Eof) => return Ok(None),
            Err(e) => {
                return Err(GatewayError::MalformedCallback {
                    message: format!("invalid XML at position {}: {e}", reader.error_position()),
                });
            }
            _ => {}
        }
    }
}
