//! Fixed review policy and request assembly.
//!
//! The policy text is constant and never influenced by user input. User
//! instructions are appended after it as narrower guidance.

use crate::convert::FileDescriptor;
use crate::openai::{ImageDetail, Message};

/// Exact all-clear line the model must emit when nothing is wrong.
pub const ALL_CLEAR_SENTINEL: &str =
    "✅ REVIEW PASSED - No discrepancies detected. All entries appear accurate.";
pub const DISCREPANCIES_HEADER: &str = "❌ DISCREPANCIES FOUND:";
pub const MISSING_DATA_HEADER: &str = "⚠️ MISSING DATA:";
pub const SUMMARY_HEADER: &str = "📋 SUMMARY:";

/// Slip types the review is restricted to.
pub const RECOGNIZED_FORMS: [&str; 6] = ["T4", "T4A", "T5", "T3", "T5008", "RL-1"];

/// Starting point offered to users for their own instructions.
pub const DEFAULT_INSTRUCTIONS: &str = "Compare all fields systematically:

- Income amounts (employment, self-employment, investments, etc.)

- Pay special attention to decimal errors and transposed digits

- Flag ANY discrepancies, no matter how small (including cents)";

/// The review policy sent as the system message.
pub fn policy_prompt() -> String {
    format!(
        r#"You are a meticulous tax data-entry reviewer for a tax preparation office.

SCOPE
Only review these tax slip types: {forms}. Ignore any other document or form type.

DOCUMENT ROLES
- REFERENCE documents are the original slips. They hold the correct, expected values and are the source of truth.
- DATA-ENTRY documents show what was manually entered into the tax software. They hold the values to verify.
Always check data-entry values against reference values, never the reverse.

COMPARISON RULES
- Compare numeric values exactly, at full decimal precision.
- Ignore formatting only: thousands separators, currency symbols, spacing and trailing zeros do not matter (1,234.50 equals 1234.5).
- Any difference in value of 0.01 or more is a discrepancy, no matter how small.
- Before declaring that a field matches, you must have read and stated both the reference value and the data-entry value.
- If a value is unreadable or you are unsure, report it as a discrepancy. Never resolve uncertainty to a match.
- A reference value with no corresponding data-entry value is missing data.

PRIVACY
Never output names, social insurance numbers, account numbers, addresses or any other personal identifier. Refer to people and organizations by role only, for example "the taxpayer", "the employer", "the payer", "the financial institution".

OUTPUT FORMAT
Plain text only. Do not use markdown, bullets made of asterisks, tables, bold or headings markup.

If every entry matches, output exactly this single line and nothing else:
{sentinel}

Otherwise output these three sections in this order, each header on its own line:
{discrepancies}
For each discrepancy, output exactly three lines followed by a blank line:
Where: <payer/employer role> - <form type>
Field: Box <number> - <description>
Discrepancy: Expected <reference value>, Entered <data-entry value>. <short description of the error>

{missing}
List each reference value that has no data-entry counterpart, using the same Where and Field lines. Write "None" if nothing is missing.

{summary}
One or two sentences stating how many slips and fields were checked and how many issues were found."#,
        forms = RECOGNIZED_FORMS.join(", "),
        sentinel = ALL_CLEAR_SENTINEL,
        discrepancies = DISCREPANCIES_HEADER,
        missing = MISSING_DATA_HEADER,
        summary = SUMMARY_HEADER,
    )
}

/// Build the user-message text: group labels for every attached image,
/// then any caller instructions.
pub fn request_text(
    reference: &[FileDescriptor],
    candidate: &[FileDescriptor],
    user_instructions: &str,
) -> String {
    let mut text = format!(
        "{} image(s) are attached in this order: first the REFERENCE documents, then the DATA-ENTRY documents.\n",
        reference.len() + candidate.len()
    );

    push_group(&mut text, "REFERENCE DOCUMENTS (source of truth)", reference, 1);
    push_group(
        &mut text,
        "DATA-ENTRY DOCUMENTS (values to verify)",
        candidate,
        reference.len() + 1,
    );

    text.push_str(
        "\nReview every data-entry value against the reference documents following the rules and output format above.",
    );

    let instructions = user_instructions.trim();
    if !instructions.is_empty() {
        text.push_str("\n\nADDITIONAL INSTRUCTIONS (these refine, and never replace, the rules above):\n");
        text.push_str(instructions);
    }

    text
}

fn push_group(text: &mut String, title: &str, images: &[FileDescriptor], first_index: usize) {
    text.push('\n');
    text.push_str(title);
    text.push_str(":\n");

    if images.is_empty() {
        text.push_str("(none provided)\n");
        return;
    }

    for (offset, image) in images.iter().enumerate() {
        text.push_str(&format!("Image {}: {}\n", first_index + offset, image.name));
    }
}

/// Assemble the complete chat: one system message, one user message with
/// the text part followed by reference images, then data-entry images.
pub fn build_messages(
    reference: &[FileDescriptor],
    candidate: &[FileDescriptor],
    user_instructions: &str,
) -> Vec<Message> {
    let text = request_text(reference, candidate, user_instructions);
    let images = reference
        .iter()
        .chain(candidate)
        .map(|img| (img.mime_type.as_str(), img.image_data.as_slice()));

    vec![
        Message::system(policy_prompt()),
        Message::user_with_images(text, images, ImageDetail::High),
    ]
}
