//! Vendor adapters, one module per provider.

mod cloud;
mod evolution;
mod mailgun;
mod resend;
mod sendgrid;
mod twilio;
mod vonage;
mod zenvia;

pub use cloud::{CloudConfig, CloudGateway};
pub use evolution::{EvolutionConfig, EvolutionGateway};
pub use mailgun::{MailgunConfig, MailgunEmail};
pub use resend::{ResendConfig, ResendEmail};
pub use sendgrid::{SendGridConfig, SendGridEmail};
pub use twilio::{TwilioConfig, TwilioSms};
pub use vonage::{VonageConfig, VonageSms};
pub use zenvia::{ZenviaConfig, ZenviaSms};
