// Prompt constants and prompt-building utilities for the interview service.
// Every prompt the LLM client sends is defined here.

use chrono::NaiveDate;

use crate::models::conversation::{ChatMessage, Role};

/// Token the model emits once the user confirms the interview is over.
pub const END_MARKER: &str = "<END>";

/// System prompt fragment that enforces JSON-only output.
pub const JSON_ONLY_SYSTEM: &str = "You are a precise, structured assistant. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Persona shared by the interview and resume prompts.
const PERSONA: &str = "\
You are a friendly recruitment assistant that helps job seekers build a resume \
over text message. You always speak plainly, warmly and briefly.";

/// Interview script. Replace `{today}` and `{end_marker}` before sending.
const INTERVIEW_TEMPLATE: &str = "\
{persona} Today's date is {today}.

Collect what is needed for a resume by asking short questions, one or two at a time. \
The user is texting from a phone, so keep every message brief.

Order of the interview:
1. Full name.
2. Contact details: confirm the phone number they are texting from or get another one, \
then email, city and country.
3. Work history, most recent first. For each job get the employer, title, start and \
end dates, and what they did day to day. Keep asking for earlier jobs until they say \
there are no more. If they have no work history, ask about internships or volunteering.
4. Education and training, including certifications relevant to their work.
5. Skills: technical skills (for example forklift driving, plumbing, wiring, software) \
and soft skills (for example communication, teamwork, problem solving).

Rules:
- If the user goes off topic, steer back: \"Let's focus on building your resume. \
Do you have anything else to add?\"
- If the user does not have or does not want to share something, skip it.
- When everything is collected, send a short summary of what you have and ask if \
they want to add anything.
- When the user says they are done, thank them and end your reply with {end_marker}. \
Never write {end_marker} before the user confirms they are done.";

pub const SUMMARY_SYSTEM: &str = "\
You organize interview transcripts into resume material. Summarize everything the \
job seeker said into the parts needed for a professional resume: name, contact \
details, work experience with dates and duties, education, certifications and skills. \
Keep every work description the user gave. Do not invent anything.";

pub const RESUME_SYSTEM: &str = "\
You are a professional resume writer. Write a compelling, recruiter-ready resume in \
plain text using the facts provided. Expand each job into a full list of duties the \
person most likely performed in that role. Leave out anything that was not provided, \
and rewrite anything non-standard so it reads well to a recruiter. Return only the \
resume text.";

/// Resume prompt. Replace `{phone_number}` and `{summary}` before sending.
const RESUME_PROMPT_TEMPLATE: &str = "\
Write the resume from this summary.

Phone number: {phone_number}

Summary:
{summary}";

/// Name extraction prompt. Replace `{summary}` before sending.
pub const NAME_EXTRACTION_PROMPT: &str = r#"Find the job seeker's full name in the summary below.

SUMMARY:
{summary}

Return exactly: {"name": "<full name>"}"#;

pub fn build_interview_system(today: NaiveDate) -> String {
    INTERVIEW_TEMPLATE
        .replace("{persona}", PERSONA)
        .replace("{today}", &today.format("%Y-%m-%d").to_string())
        .replace("{end_marker}", END_MARKER)
}

pub fn build_resume_prompt(summary: &str, phone_number: &str) -> String {
    RESUME_PROMPT_TEMPLATE
        .replace("{phone_number}", phone_number)
        .replace("{summary}", summary)
}

/// Renders history as `User:` / `Assistant:` lines for single-prompt operations.
pub fn format_transcript(history: &[ChatMessage]) -> String {
    history
        .iter()
        .map(|m| {
            let speaker = match m.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
            };
            format!("{speaker}: {}", m.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
