//! Message rendering: turns a recipient record plus a template into the six
//! concrete fields handed to the delivery transport.

use crate::recipients::Recipient;
use anyhow::{bail, Context, Result};
use handlebars::Handlebars;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The six message parts every template and rendered message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageField {
    SenderName,
    SenderEmail,
    Subject,
    RecipientName,
    RecipientEmail,
    Body,
}

impl MessageField {
    pub const ALL: [MessageField; 6] = [
        MessageField::SenderName,
        MessageField::SenderEmail,
        MessageField::Subject,
        MessageField::RecipientName,
        MessageField::RecipientEmail,
        MessageField::Body,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MessageField::SenderName => "sender_name",
            MessageField::SenderEmail => "sender_email",
            MessageField::Subject => "subject",
            MessageField::RecipientName => "recipient_name",
            MessageField::RecipientEmail => "recipient_email",
            MessageField::Body => "body",
        }
    }
}

impl fmt::Display for MessageField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-recipient rendering failure. Terminal for that recipient and never
/// retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("render error: {0} is empty after substitution")]
    EmptyField(MessageField),
    #[error("render error: {field} template failed: {message}")]
    Template {
        field: MessageField,
        message: String,
    },
}

/// Fully substituted message, ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedMessage {
    pub sender_name: String,
    pub sender_email: String,
    pub subject: String,
    pub recipient_name: String,
    pub recipient_email: String,
    pub body: String,
}

impl RenderedMessage {
    pub fn get(&self, field: MessageField) -> &str {
        match field {
            MessageField::SenderName => &self.sender_name,
            MessageField::SenderEmail => &self.sender_email,
            MessageField::Subject => &self.subject,
            MessageField::RecipientName => &self.recipient_name,
            MessageField::RecipientEmail => &self.recipient_email,
            MessageField::Body => &self.body,
        }
    }

    /// `Name <email>` form used for the sender header.
    pub fn from_header(&self) -> String {
        mailbox(&self.sender_name, &self.sender_email)
    }

    /// `Name <email>` form used for the recipient header.
    pub fn to_header(&self) -> String {
        mailbox(&self.recipient_name, &self.recipient_email)
    }

    /// Rejects messages with any empty part.
    pub fn ensure_complete(&self) -> Result<(), RenderError> {
        for field in MessageField::ALL {
            if self.get(field).trim().is_empty() {
                return Err(RenderError::EmptyField(field));
            }
        }
        Ok(())
    }
}

fn mailbox(name: &str, email: &str) -> String {
    format!("{name} <{email}>")
}

/// Produces the concrete message for one recipient.
pub trait MessageRenderer: Send + Sync {
    fn render(&self, recipient: &Recipient) -> Result<RenderedMessage, RenderError>;
}

/// Raw template strings, one per message part, using `{{field}}` placeholders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageTemplate {
    pub sender_name: String,
    pub sender_email: String,
    pub subject: String,
    pub recipient_name: String,
    pub recipient_email: String,
    pub body: String,
}

impl MessageTemplate {
    pub fn get(&self, field: MessageField) -> &str {
        match field {
            MessageField::SenderName => &self.sender_name,
            MessageField::SenderEmail => &self.sender_email,
            MessageField::Subject => &self.subject,
            MessageField::RecipientName => &self.recipient_name,
            MessageField::RecipientEmail => &self.recipient_email,
            MessageField::Body => &self.body,
        }
    }

    /// True once any part has been filled in.
    pub fn is_started(&self) -> bool {
        MessageField::ALL
            .iter()
            .any(|field| !self.get(*field).trim().is_empty())
    }

    pub fn validate(&self) -> Result<()> {
        for field in MessageField::ALL {
            if self.get(field).trim().is_empty() {
                bail!("template field {field} cannot be empty");
            }
        }
        Ok(())
    }
}

/// Handlebars-backed renderer. Templates are compiled once up front.
pub struct TemplateRenderer {
    registry: Handlebars<'static>,
}

impl TemplateRenderer {
    pub fn new(template: &MessageTemplate) -> Result<Self> {
        template.validate()?;

        let mut registry = Handlebars::new();
        for field in MessageField::ALL {
            registry
                .register_template_string(field.as_str(), template.get(field))
                .with_context(|| format!("failed to compile {field} template"))?;
        }

        Ok(Self { registry })
    }

    fn render_field(
        &self,
        field: MessageField,
        context: &serde_json::Value,
    ) -> Result<String, RenderError> {
        self.registry
            .render(field.as_str(), context)
            .map_err(|err| RenderError::Template {
                field,
                message: err.to_string(),
            })
    }
}

impl fmt::Debug for TemplateRenderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateRenderer").finish_non_exhaustive()
    }
}

impl MessageRenderer for TemplateRenderer {
    fn render(&self, recipient: &Recipient) -> Result<RenderedMessage, RenderError> {
        let context = recipient.render_context();
        let message = RenderedMessage {
            sender_name: self.render_field(MessageField::SenderName, &context)?,
            sender_email: self.render_field(MessageField::SenderEmail, &context)?,
            subject: self.render_field(MessageField::Subject, &context)?,
            recipient_name: self.render_field(MessageField::RecipientName, &context)?,
            recipient_email: self.render_field(MessageField::RecipientEmail, &context)?,
            body: self.render_field(MessageField::Body, &context)?,
        };
        message.ensure_complete()?;
        Ok(message)
    }
}
