use crate::api::{EmailRequest, PulseClient};
use crate::error::Result;
use crate::output::OutputManager;
use clap::Args;

#[derive(Args, Debug)]
pub struct NotifyArgs {
    /// Email subject
    #[arg(long, short)]
    pub subject: String,

    /// Email body
    #[arg(long, short)]
    pub body: String,

    /// Recipient, defaults to the agent's alert address
    #[arg(long)]
    pub to: Option<String>,
}

pub async fn run(args: NotifyArgs, client: PulseClient, output: OutputManager) -> Result<()> {
    let request = EmailRequest {
        subject: args.subject,
        body: args.body,
        to: args.to,
    };

    let response = client.notify_email(&request).await?;
    output.print_success(&format!("Email {}", response.status))
}
