//! Alarm XML envelope
//!
//! The appliance starts a plate read when it receives an alarm document on
//! its trigger port:
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8"?>
//! <Alarm><AlarmDetail><AlarmType>40</AlarmType><ExtraFields>
//! <EF Name="CameraMask">1</EF><EF Name="PathImage"></EF><EF Name="PathEvidence"></EF>
//! </ExtraFields></AlarmDetail></Alarm>
//! ```

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use super::{AnprError, ALARM_TYPE_PLATE};

/// Alarm trigger request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmRequest {
    pub alarm_type: u32,
    pub camera_mask: String,
    pub path_image: String,
    pub path_evidence: String,
}

impl AlarmRequest {
    /// Plate read alarm for `camera_mask`, image paths left to the appliance
    pub fn plate_read(camera_mask: impl Into<String>) -> Self {
        Self {
            alarm_type: ALARM_TYPE_PLATE,
            camera_mask: camera_mask.into(),
            path_image: String::new(),
            path_evidence: String::new(),
        }
    }

    /// Serialize to the wire document
    pub fn to_xml(&self) -> Result<String, AnprError> {
        let mut writer = Writer::new(Vec::new());

        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        writer.write_event(Event::Start(BytesStart::new("Alarm")))?;
        writer.write_event(Event::Start(BytesStart::new("AlarmDetail")))?;

        writer.write_event(Event::Start(BytesStart::new("AlarmType")))?;
        writer.write_event(Event::Text(BytesText::new(&self.alarm_type.to_string())))?;
        writer.write_event(Event::End(BytesEnd::new("AlarmType")))?;

        writer.write_event(Event::Start(BytesStart::new("ExtraFields")))?;
        write_extra_field(&mut writer, "CameraMask", &self.camera_mask)?;
        write_extra_field(&mut writer, "PathImage", &self.path_image)?;
        write_extra_field(&mut writer, "PathEvidence", &self.path_evidence)?;
        writer.write_event(Event::End(BytesEnd::new("ExtraFields")))?;

        writer.write_event(Event::End(BytesEnd::new("AlarmDetail")))?;
        writer.write_event(Event::End(BytesEnd::new("Alarm")))?;

        Ok(String::from_utf8_lossy(&writer.into_inner()).to_string())
    }

    /// Parse a wire document. Unknown extra fields are ignored.
    pub fn from_xml(xml: &str) -> Result<Self, AnprError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut alarm_type: Option<u32> = None;
        let mut request = AlarmRequest::plate_read("");
        let mut current_tag = String::new();
        let mut current_field: Option<String> = None;
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(ref e)) => {
                    current_tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                    if current_tag == "EF" {
                        current_field = field_name(e);
                    }
                }
                Ok(Event::Text(ref e)) => {
                    let text = e.unescape().unwrap_or_default().to_string();
                    if current_tag == "AlarmType" {
                        let value = text.parse().map_err(|_| {
                            AnprError::InvalidAlarm(format!("bad AlarmType '{}'", text))
                        })?;
                        alarm_type = Some(value);
                    } else if let Some(field) = current_field.as_deref() {
                        match field {
                            "CameraMask" => request.camera_mask = text,
                            "PathImage" => request.path_image = text,
                            "PathEvidence" => request.path_evidence = text,
                            _ => {}
                        }
                    }
                }
                Ok(Event::End(_)) => {
                    current_tag.clear();
                    current_field = None;
                }
                Ok(Event::Eof) => break,
                Err(e) => return Err(AnprError::Xml(e)),
                _ => {}
            }
            buf.clear();
        }

        request.alarm_type =
            alarm_type.ok_or_else(|| AnprError::InvalidAlarm("missing AlarmType".to_string()))?;
        Ok(request)
    }
}

fn write_extra_field<W: std::io::Write>(
    writer: &mut Writer<W>,
    name: &str,
    value: &str,
) -> Result<(), AnprError> {
    let mut elem = BytesStart::new("EF");
    elem.push_attribute(("Name", name));
    writer.write_event(Event::Start(elem))?;
    if !value.is_empty() {
        writer.write_event(Event::Text(BytesText::new(value)))?;
    }
    writer.write_event(Event::End(BytesEnd::new("EF")))?;
    Ok(())
}

fn field_name(e: &BytesStart) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == b"Name")
        .map(|attr| String::from_utf8_lossy(&attr.value).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plate_read_document() {
        let xml = AlarmRequest::plate_read("3").to_xml().unwrap();
        assert!(xml.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?>"#));
        assert!(xml.contains("<AlarmType>40</AlarmType>"));
        assert!(xml.contains(r#"<EF Name="CameraMask">3</EF>"#));
        assert!(xml.contains(r#"<EF Name="PathImage"></EF>"#));
        assert!(xml.ends_with("</ExtraFields></AlarmDetail></Alarm>"));
    }

    #[test]
    fn test_parse_single_quoted_document() {
        let xml = "<?xml version='1.0' encoding='UTF-8'?><Alarm><AlarmDetail>\
                   <AlarmType>40</AlarmType><ExtraFields><EF Name='CameraMask'>7</EF>\
                   <EF Name='PathImage'>D:\\tmp</EF><EF Name='PathEvidence'></EF>\
                   </ExtraFields></AlarmDetail></Alarm>";
        let request = AlarmRequest::from_xml(xml).unwrap();
        assert_eq!(request.alarm_type, 40);
        assert_eq!(request.camera_mask, "7");
        assert_eq!(request.path_image, "D:\\tmp");
        assert_eq!(request.path_evidence, "");
    }

    #[test]
    fn test_missing_alarm_type() {
        let err = AlarmRequest::from_xml("<Alarm><AlarmDetail></AlarmDetail></Alarm>").unwrap_err();
        assert!(matches!(err, AnprError::InvalidAlarm(_)));
    }
}
