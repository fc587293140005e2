/// Label prefixed to the transcript text in a conversation's first message.
pub const TRANSCRIPT_LABEL: &str = "Video Transcript:\n\n";

/// Assistant reply used when generation fails.
pub const FALLBACK_MESSAGE: &str = "Sorry, I encountered an error. Please try again.";

/// Appended to every prompt so replies come back as structured markdown.
pub const MARKDOWN_INSTRUCTION: &str =
    "(Respond in markdown format. Use markdown for all lists, headings, and code blocks if any.)";

/// Quick-action prompts offered for every conversation.
pub const QUICK_PROMPTS: [&str; 5] = [
    "Generate bullet-point notes from this video",
    "Create a summary of the key points",
    "Generate quiz questions (MCQs) based on the content",
    "Create interview/viva questions about this topic with answers",
    "Generate flashcards for key concepts",
];

pub const LOG_FILE_PATH: &str = "/tmp/clyp.log";

pub const GENERATOR_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

pub const GENERATOR_MODEL: &str = "gemini-2.5-flash";

pub const TRANSCRIPT_ENDPOINT: &str = "https://www.youtube-transcript.io/api";

pub const METADATA_ENDPOINT: &str = "https://www.youtube.com/oembed";

/// Seconds between two store polls.
pub const POLL_INTERVAL_SECS: u64 = 3;
