//! Notifications the engine emits and how they become messages.
//!
//! The reconcilers decide *which* [`Notification`] goes out and *when*; a
//! [`Presenter`] owns the wording. [`PlainPresenter`] renders plain English.

use crate::config::GuildSettings;
use crate::error::{ReconcileError, Result};
use crate::model::{Reminder, Snowflake};
use crate::remote::{Button, Embed, EmbedField, EntityType, OutboundMessage, RemoteScheduledEvent};
use chrono::{DateTime, Utc};

/// Prefix of the `custom_id` on scheduled event buttons.
pub const EVENT_DETAILS_BUTTON: &str = "scheduled-event-details";

const COLOR_CREATED: u32 = 0x5865F2;
const COLOR_STARTED: u32 = 0x57F287;
const COLOR_SOON: u32 = 0xFEE75C;
const COLOR_ENDED: u32 = 0x99AAB5;
const COLOR_CANCELED: u32 = 0xED4245;

/// Where an event happens, resolved from its entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventVenue {
    Channel(Snowflake),
    Location(String),
}

/// Validated data needed to announce a live scheduled event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDetails {
    pub guild_id: Snowflake,
    pub event_id: Snowflake,
    pub name: String,
    pub description: Option<String>,
    pub creator_id: Snowflake,
    pub venue: EventVenue,
    pub scheduled_start_time: DateTime<Utc>,
}

impl EventDetails {
    /// Validate a remote event for announcement.
    ///
    /// # Errors
    ///
    /// [`ReconcileError::MissingField`] when the creator, channel or location is
    /// absent, [`ReconcileError::UnexpectedValue`] for an unknown entity type.
    pub fn from_remote(event: &RemoteScheduledEvent) -> Result<Self> {
        let missing = |field| ReconcileError::MissingField {
            entity: format!("scheduled event {}", event.id),
            field,
        };

        let creator_id = event.creator_id.ok_or_else(|| missing("creator_id"))?;
        let venue = match event.entity_type()? {
            EntityType::StageInstance | EntityType::Voice => {
                EventVenue::Channel(event.channel_id.ok_or_else(|| missing("channel_id"))?)
            }
            EntityType::External => EventVenue::Location(
                event
                    .location()
                    .ok_or_else(|| missing("entity_metadata.location"))?
                    .to_owned(),
            ),
        };

        Ok(Self {
            guild_id: event.guild_id,
            event_id: event.id,
            name: event.name.clone(),
            description: event
                .description
                .as_deref()
                .map(str::trim)
                .filter(|text| !text.is_empty())
                .map(str::to_owned),
            creator_id,
            venue,
            scheduled_start_time: event.scheduled_start_time,
        })
    }
}

/// Something worth telling a guild about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    EventCreated(EventDetails),
    EventStartingSoon(EventDetails),
    EventStarted(EventDetails),
    EventCompleted {
        guild_id: Snowflake,
        event_id: Snowflake,
        name: String,
        actual_start_time: Option<DateTime<Utc>>,
        ended_at: DateTime<Utc>,
    },
    EventCanceled {
        guild_id: Snowflake,
        event_id: Snowflake,
        name: String,
    },
    ReminderDue {
        guild_id: Snowflake,
        user_id: Snowflake,
        reminder: Reminder,
    },
}

/// Turns notifications into messages.
pub trait Presenter: Send + Sync {
    fn render(&self, notification: &Notification, settings: &GuildSettings) -> OutboundMessage;
}

/// `custom_id` for the details button of a scheduled event.
pub fn event_button_id(guild_id: Snowflake, event_id: Snowflake) -> String {
    format!("{EVENT_DETAILS_BUTTON}:{guild_id}:{event_id}")
}

/// Inverse of [`event_button_id`], for whoever answers the button press.
pub fn parse_event_button_id(custom_id: &str) -> Option<(Snowflake, Snowflake)> {
    let mut parts = custom_id.split(':');
    if parts.next()? != EVENT_DETAILS_BUTTON {
        return None;
    }
    let guild_id = parts.next()?.parse().ok()?;
    let event_id = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((guild_id, event_id))
}

/// English renderer using Discord markdown mentions and timestamps.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainPresenter;

impl PlainPresenter {
    fn role_ping(settings: &GuildSettings) -> (String, Vec<Snowflake>) {
        match settings.event_notification_role {
            Some(role) => (format!("<@&{role}>"), vec![role]),
            None => (String::new(), Vec::new()),
        }
    }

    fn venue_field(venue: &EventVenue) -> EmbedField {
        let value = match venue {
            EventVenue::Channel(channel) => format!("<#{channel}>"),
            EventVenue::Location(location) => location.clone(),
        };
        EmbedField {
            name: "Where".to_owned(),
            value,
        }
    }

    fn details_button(details: &EventDetails) -> Button {
        Button {
            label: "Details".to_owned(),
            custom_id: Some(event_button_id(details.guild_id, details.event_id)),
            url: None,
        }
    }

    fn event_message(
        details: &EventDetails,
        settings: &GuildSettings,
        title: String,
        color: u32,
        with_start: bool,
    ) -> OutboundMessage {
        let (content, mention_roles) = Self::role_ping(settings);
        let mut fields = vec![
            EmbedField {
                name: "Host".to_owned(),
                value: format!("<@{}>", details.creator_id),
            },
            Self::venue_field(&details.venue),
        ];
        if with_start {
            let unix = details.scheduled_start_time.timestamp();
            fields.push(EmbedField {
                name: "Starts".to_owned(),
                value: format!("<t:{unix}:F> (<t:{unix}:R>)"),
            });
        }
        OutboundMessage {
            content,
            embed: Some(Embed {
                title: Some(title),
                description: details.description.clone(),
                url: None,
                color: Some(color),
                fields,
            }),
            buttons: vec![Self::details_button(details)],
            mention_roles,
        }
    }
}

fn format_duration(duration: chrono::Duration) -> String {
    let minutes = duration.num_minutes().max(0);
    match (minutes / 60, minutes % 60) {
        (0, m) => format!("{m}m"),
        (h, 0) => format!("{h}h"),
        (h, m) => format!("{h}h {m}m"),
    }
}

impl Presenter for PlainPresenter {
    fn render(&self, notification: &Notification, settings: &GuildSettings) -> OutboundMessage {
        match notification {
            Notification::EventCreated(details) => Self::event_message(
                details,
                settings,
                format!("New event: {}", details.name),
                COLOR_CREATED,
                true,
            ),
            Notification::EventStartingSoon(details) => Self::event_message(
                details,
                settings,
                format!("Starting soon: {}", details.name),
                COLOR_SOON,
                true,
            ),
            Notification::EventStarted(details) => Self::event_message(
                details,
                settings,
                format!("Event started: {}", details.name),
                COLOR_STARTED,
                false,
            ),
            Notification::EventCompleted {
                name,
                actual_start_time,
                ended_at,
                ..
            } => {
                let description = actual_start_time
                    .map(|started| format!("Lasted {}", format_duration(*ended_at - started)));
                OutboundMessage {
                    content: String::new(),
                    embed: Some(Embed {
                        title: Some(format!("Event finished: {name}")),
                        description,
                        url: None,
                        color: Some(COLOR_ENDED),
                        fields: Vec::new(),
                    }),
                    buttons: Vec::new(),
                    mention_roles: Vec::new(),
                }
            }
            Notification::EventCanceled { name, .. } => OutboundMessage {
                content: String::new(),
                embed: Some(Embed {
                    title: Some(format!("Event canceled: {name}")),
                    description: None,
                    url: None,
                    color: Some(COLOR_CANCELED),
                    fields: Vec::new(),
                }),
                buttons: Vec::new(),
                mention_roles: Vec::new(),
            },
            Notification::ReminderDue {
                guild_id,
                user_id,
                reminder,
            } => OutboundMessage {
                content: format!("<@{user_id}>"),
                embed: Some(Embed {
                    title: Some("Reminder".to_owned()),
                    description: Some(reminder.text.clone()),
                    url: None,
                    color: Some(COLOR_CREATED),
                    fields: Vec::new(),
                }),
                buttons: vec![Button {
                    label: "Original message".to_owned(),
                    custom_id: None,
                    url: Some(reminder.origin.jump_url(*guild_id)),
                }],
                mention_roles: Vec::new(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::model::MessageRef;
    use crate::remote::EntityMetadata;
    use chrono::TimeZone;

    fn remote(entity_type: u8) -> RemoteScheduledEvent {
        RemoteScheduledEvent {
            id: Snowflake(10),
            guild_id: Snowflake(1),
            name: "Raid".to_owned(),
            description: Some("  ".to_owned()),
            creator_id: Some(Snowflake(3)),
            channel_id: Some(Snowflake(4)),
            entity_type,
            entity_metadata: None,
            status: 1,
            scheduled_start_time: Utc.timestamp_opt(1_000, 0).unwrap(),
            scheduled_end_time: None,
        }
    }

    #[test]
    fn voice_event_uses_channel_venue() {
        let details = EventDetails::from_remote(&remote(2)).unwrap();
        assert_eq!(details.venue, EventVenue::Channel(Snowflake(4)));
        assert_eq!(details.description, None);
    }

    #[test]
    fn external_event_requires_location() {
        let err = EventDetails::from_remote(&remote(3)).unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::MissingField {
                field: "entity_metadata.location",
                ..
            }
        ));

        let mut event = remote(3);
        event.entity_metadata = Some(EntityMetadata {
            location: Some("Park".to_owned()),
        });
        let details = EventDetails::from_remote(&event).unwrap();
        assert_eq!(details.venue, EventVenue::Location("Park".to_owned()));
    }

    #[test]
    fn missing_creator_is_data_integrity_error() {
        let mut event = remote(1);
        event.creator_id = None;
        assert!(matches!(
            EventDetails::from_remote(&event),
            Err(ReconcileError::MissingField {
                field: "creator_id",
                ..
            })
        ));
    }

    #[test]
    fn unknown_entity_type_is_rejected() {
        let err = EventDetails::from_remote(&remote(42)).unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[test]
    fn button_id_round_trips() {
        let id = event_button_id(Snowflake(1), Snowflake(2));
        assert_eq!(id, "scheduled-event-details:1:2");
        assert_eq!(parse_event_button_id(&id), Some((Snowflake(1), Snowflake(2))));
        assert_eq!(parse_event_button_id("other:1:2"), None);
        assert_eq!(parse_event_button_id("scheduled-event-details:1:2:3"), None);
    }

    #[test]
    fn created_message_pings_role_and_carries_button() {
        let settings = GuildSettings {
            event_notification_role: Some(Snowflake(77)),
            ..GuildSettings::default()
        };
        let details = EventDetails::from_remote(&remote(2)).unwrap();
        let message = PlainPresenter.render(&Notification::EventCreated(details), &settings);
        assert_eq!(message.content, "<@&77>");
        assert_eq!(message.mention_roles, vec![Snowflake(77)]);
        assert_eq!(
            message.buttons[0].custom_id.as_deref(),
            Some("scheduled-event-details:1:10")
        );
        let embed = message.embed.unwrap();
        assert_eq!(embed.title.as_deref(), Some("New event: Raid"));
        assert!(embed.fields.iter().any(|f| f.value == "<t:1000:F> (<t:1000:R>)"));
    }

    #[test]
    fn completed_message_reports_duration() {
        let start = Utc.timestamp_opt(0, 0).unwrap();
        let message = PlainPresenter.render(
            &Notification::EventCompleted {
                guild_id: Snowflake(1),
                event_id: Snowflake(2),
                name: "Raid".to_owned(),
                actual_start_time: Some(start),
                ended_at: start + chrono::Duration::minutes(95),
            },
            &GuildSettings::default(),
        );
        assert_eq!(
            message.embed.unwrap().description.as_deref(),
            Some("Lasted 1h 35m")
        );
    }

    #[test]
    fn reminder_links_back_to_origin() {
        let reminder = Reminder {
            text: "stretch".to_owned(),
            due_at: Utc.timestamp_opt(0, 0).unwrap(),
            channel_id: Snowflake(5),
            origin: MessageRef {
                channel_id: Snowflake(5),
                message_id: Snowflake(6),
            },
        };
        let message = PlainPresenter.render(
            &Notification::ReminderDue {
                guild_id: Snowflake(1),
                user_id: Snowflake(2),
                reminder,
            },
            &GuildSettings::default(),
        );
        assert_eq!(message.content, "<@2>");
        assert_eq!(
            message.buttons[0].url.as_deref(),
            Some("https://discord.com/channels/1/5/6")
        );
    }
}
