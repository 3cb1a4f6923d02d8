// Prompt fragments for generative field completion.

pub const FIELD_FILL_PREAMBLE: &str = "You are filling out a job application form.";

pub const OPTION_CHOICE_INSTRUCTION: &str =
    "You must choose one of the options above. Respond with the exact text of your chosen option.";

pub const FIELD_FILL_INSTRUCTIONS: &[&str] = &[
    "Provide a concise, professional answer appropriate for this field",
    "Be honest and accurate based on the provided background",
    "Keep answers brief unless the field explicitly asks for detail",
    "For yes/no questions, respond with just 'yes' or 'no'",
];

pub const MULTIPLE_CHOICE_INSTRUCTION: &str =
    "For multiple choice, respond with ONLY the exact option text from the list above";

pub const ANSWER_CUE: &str = "Your Answer (text only, no explanation):";
