//! Assembly of [`EventRecord`]s from independently failable parts.

use super::{EventRecord, PublisherCache};
use crate::client::{EventLogClient, OwnedHandle};
use crate::error::Result;
use crate::native::FormatFlags;
use crate::subscriptions::EngineConfig;
use crate::types::{Filetime, SystemProperty};
use crate::variant::{RenderContext, Variant, VariantArray, VariantDecoder};
use std::sync::Arc;
use tracing::debug;

/// Display strings resolved through publisher metadata.
///
/// Every field is independently best-effort and empty when unresolved.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageTexts {
    pub msg: String,
    pub level: String,
    pub task: String,
    pub opcode: String,
    pub keywords: String,
    pub channel: String,
    pub provider: String,
    pub id: String,
}

/// Turns delivered event handles into [`EventRecord`]s.
pub struct EventRecordAssembler {
    client: EventLogClient,
    decoder: VariantDecoder,
    publishers: PublisherCache,
    render_messages: bool,
}

impl EventRecordAssembler {
    pub fn new(client: EventLogClient, context: Arc<RenderContext>, config: &EngineConfig) -> Self {
        Self {
            decoder: VariantDecoder::new(client.clone(), context),
            publishers: PublisherCache::new(client.clone(), config.publisher_cache_size),
            render_messages: config.render_messages,
            client,
        }
    }

    pub fn decoder(&self) -> &VariantDecoder {
        &self.decoder
    }

    pub fn publishers(&self) -> &PublisherCache {
        &self.publishers
    }

    /// Decode, render, resolve messages and assemble.
    ///
    /// Decoding and XML rendering failures fail the record; message
    /// resolution only ever degrades it.
    pub fn process(&self, event: &OwnedHandle, subscribed_channel: &str) -> Result<EventRecord> {
        let values = self.decoder.decode(event)?;
        let xml = self.client.render_xml(event)?;
        let messages = self.resolve_messages(&values, event);
        Self::assemble(&values, xml, subscribed_channel, messages)
    }

    /// Combine decoded system fields, raw text and message texts.
    pub fn assemble(
        values: &VariantArray,
        xml: String,
        subscribed_channel: &str,
        messages: MessageTexts,
    ) -> Result<EventRecord> {
        let created = match values.system(SystemProperty::TimeCreated)? {
            Variant::Null => Filetime::default(),
            _ => values.filetime(SystemProperty::TimeCreated.ordinal())?,
        };

        Ok(EventRecord {
            xml,
            provider_name: optional_string(values, SystemProperty::ProviderName)?,
            event_id: optional_uint(values, SystemProperty::EventId)?,
            qualifiers: optional_uint(values, SystemProperty::Qualifiers)?,
            level: optional_uint(values, SystemProperty::Level)?,
            task: optional_uint(values, SystemProperty::Task)?,
            opcode: optional_uint(values, SystemProperty::Opcode)?,
            created: created.to_datetime(),
            record_id: optional_uint(values, SystemProperty::EventRecordId)?,
            process_id: optional_uint(values, SystemProperty::ProcessId)?,
            thread_id: optional_uint(values, SystemProperty::ThreadId)?,
            channel: optional_string(values, SystemProperty::Channel)?,
            computer_name: optional_string(values, SystemProperty::Computer)?,
            version: optional_uint(values, SystemProperty::Version)?,
            msg: messages.msg,
            level_text: messages.level,
            task_text: messages.task,
            opcode_text: messages.opcode,
            keywords: messages.keywords,
            channel_text: messages.channel,
            provider_text: messages.provider,
            id_text: messages.id,
            bookmark: None,
            subscribed_channel: subscribed_channel.to_string(),
        })
    }

    /// Best-effort message lookup through the record's publisher.
    pub fn resolve_messages(&self, values: &VariantArray, event: &OwnedHandle) -> MessageTexts {
        if !self.render_messages {
            return MessageTexts::default();
        }
        let provider = match values.string(SystemProperty::ProviderName.ordinal()) {
            Ok(provider) if !provider.is_empty() => provider,
            _ => return MessageTexts::default(),
        };
        let publisher = match self.publishers.get(provider) {
            Ok(publisher) => publisher,
            Err(err) => {
                debug!(provider, error = %err, "publisher metadata unavailable, message left empty");
                return MessageTexts::default();
            }
        };

        let format = |flags: FormatFlags| match self.client.format_message(&publisher, event, flags) {
            Ok(text) => text,
            Err(err) => {
                debug!(provider, ?flags, error = %err, "message format failed");
                String::new()
            }
        };

        MessageTexts {
            msg: format(FormatFlags::Event),
            level: format(FormatFlags::Level),
            task: format(FormatFlags::Task),
            opcode: format(FormatFlags::Opcode),
            keywords: format(FormatFlags::Keyword),
            channel: format(FormatFlags::Channel),
            provider: format(FormatFlags::Provider),
            id: format(FormatFlags::Id),
        }
    }
}

fn optional_uint(values: &VariantArray, property: SystemProperty) -> Result<u64> {
    match values.system(property)? {
        Variant::Null => Ok(0),
        _ => values.uint(property.ordinal()),
    }
}

fn optional_string(values: &VariantArray, property: SystemProperty) -> Result<String> {
    match values.system(property)? {
        Variant::Null => Ok(String::new()),
        _ => values.string(property.ordinal()).map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TailError;

    fn system_values(provider: &str, event_id: u16) -> VariantArray {
        let mut values = vec![Variant::Null; SystemProperty::COUNT];
        values[SystemProperty::ProviderName.ordinal()] = Variant::String(provider.into());
        values[SystemProperty::EventId.ordinal()] = Variant::UInt16(event_id);
        values[SystemProperty::Level.ordinal()] = Variant::Byte(4);
        values[SystemProperty::TimeCreated.ordinal()] = Variant::FileTime(Filetime(0));
        values[SystemProperty::EventRecordId.ordinal()] = Variant::UInt64(17);
        values[SystemProperty::Channel.ordinal()] = Variant::String("Application".into());
        values[SystemProperty::Computer.ordinal()] = Variant::String("host-1".into());
        VariantArray::from_values(values)
    }

    #[test]
    fn test_assemble_maps_system_fields() {
        let values = system_values("Service Control Manager", 7036);
        let record = EventRecordAssembler::assemble(
            &values,
            "<Event/>".into(),
            "Application",
            MessageTexts::default(),
        )
        .unwrap();

        assert_eq!(record.provider_name, "Service Control Manager");
        assert_eq!(record.event_id, 7036);
        assert_eq!(record.level, 4);
        assert_eq!(record.record_id, 17);
        assert_eq!(record.qualifiers, 0);
        assert_eq!(record.computer_name, "host-1");
        assert_eq!(record.subscribed_channel, "Application");
        assert_eq!(record.created, Filetime(0).to_datetime());
        assert!(record.msg.is_empty());
        assert!(record.bookmark.is_none());
    }

    #[test]
    fn test_assemble_rejects_mistyped_field() {
        let mut values: Vec<Variant> = system_values("p", 1).iter().cloned().collect();
        values[SystemProperty::EventId.ordinal()] = Variant::String("one".into());
        let values = VariantArray::from_values(values);

        let result = EventRecordAssembler::assemble(&values, String::new(), "Application", MessageTexts::default());
        assert!(matches!(result, Err(TailError::TypeMismatch { .. })));
    }

    #[test]
    fn test_assemble_short_array_is_out_of_range() {
        let values = VariantArray::from_values(vec![Variant::String("p".into())]);
        let result = EventRecordAssembler::assemble(&values, String::new(), "Application", MessageTexts::default());
        assert!(matches!(result, Err(TailError::IndexOutOfRange { .. })));
    }

    #[test]
    fn test_record_serializes_pascal_case() {
        let values = system_values("p", 1);
        let record = EventRecordAssembler::assemble(&values, "<Event/>".into(), "Application", MessageTexts::default())
            .unwrap();
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["ProviderName"], "p");
        assert_eq!(json["EventId"], 1);
        assert_eq!(json["SubscribedChannel"], "Application");
        assert_eq!(json["Xml"], "<Event/>");
        assert!(json.get("Msg").is_some());
        assert!(json.get("IdText").is_some());
    }
}
