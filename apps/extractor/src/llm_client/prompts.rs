// Shared prompt constants and prompt-building utilities.
// Each service that needs LLM calls defines its own prompts.rs alongside it.
// This file contains cross-cutting prompt fragments.

/// System prompt fragment that enforces JSON-only output.
pub const JSON_ONLY_SYSTEM: &str = "You MUST respond with a single valid JSON object only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Evidence rule appended to every extraction prompt.
pub const EVIDENCE_INSTRUCTION: &str = "\
    CRITICAL: Every value you extract must cite the exact line(s) it came from. \
    Each line in the document is prefixed with an id like [p1_l3]; copy that id into \
    `evidence[].lineId` together with the page number and the verbatim line text. \
    Do NOT infer, translate, or invent values that are not printed in the document. \
    If you cannot cite a line for a value, leave the field null.";

/// Residue rule: nothing may be silently dropped.
pub const RESIDUE_INSTRUCTION: &str = "\
    CRITICAL: Every meaningful line must end up either in `extractedData` (via evidence) \
    or in `unmappedSegments` with its `lineReference`. When a line does not fit any field \
    (hobbies, references, volunteering, unclear text), put it in `unmappedSegments` with \
    your best-guess `detectedCategory`, a short `reason` and a `confidence` between 0 and 1.";
