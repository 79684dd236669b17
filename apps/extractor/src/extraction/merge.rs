//! Additive merge of a re-extraction result into the primary response.
//!
//! The merge never removes anything: populated scalars keep their primary value,
//! evidence is unioned, and list entries with the same identity are folded
//! together instead of duplicated.

use crate::extraction::models::{
    CognitiveResponse, ContactInfo, EducationEntry, Evidence, ExperienceEntry, LanguageEntry,
    PersonInfo, ResponseMetadata, SkillEntry, UnmappedSegment,
};

trait Mergeable {
    /// Case-insensitive identity key; `None` when the entry cannot be matched.
    fn identity(&self) -> Option<String>;
    fn absorb(&mut self, other: &Self);
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

/// Back-fills an empty slot; a blank string counts as empty.
fn fill(slot: &mut Option<String>, other: &Option<String>) {
    if is_blank(slot) && !is_blank(other) {
        slot.clone_from(other);
    }
}

fn union_evidence(target: &mut Vec<Evidence>, other: &[Evidence]) {
    for ev in other {
        if !target.iter().any(|e| e.line_id == ev.line_id) {
            target.push(ev.clone());
        }
    }
}

fn key(parts: &[&Option<String>]) -> Option<String> {
    let normalized: Vec<String> = parts
        .iter()
        .map(|p| p.as_deref().unwrap_or("").trim().to_lowercase())
        .collect();
    if normalized.iter().all(String::is_empty) {
        None
    } else {
        Some(normalized.join("|"))
    }
}

impl Mergeable for LanguageEntry {
    fn identity(&self) -> Option<String> {
        key(&[&self.name])
    }

    fn absorb(&mut self, other: &Self) {
        fill(&mut self.level, &other.level);
        union_evidence(&mut self.evidence, &other.evidence);
    }
}

impl Mergeable for SkillEntry {
    fn identity(&self) -> Option<String> {
        key(&[&self.name])
    }

    fn absorb(&mut self, other: &Self) {
        fill(&mut self.category, &other.category);
        union_evidence(&mut self.evidence, &other.evidence);
    }
}

impl Mergeable for ExperienceEntry {
    fn identity(&self) -> Option<String> {
        key(&[&self.company, &self.title])
    }

    fn absorb(&mut self, other: &Self) {
        fill(&mut self.location, &other.location);
        fill(&mut self.start_date, &other.start_date);
        fill(&mut self.end_date, &other.end_date);
        fill(&mut self.description, &other.description);
        union_evidence(&mut self.evidence, &other.evidence);
    }
}

impl Mergeable for EducationEntry {
    fn identity(&self) -> Option<String> {
        key(&[&self.institution, &self.degree])
    }

    fn absorb(&mut self, other: &Self) {
        fill(&mut self.field_of_study, &other.field_of_study);
        fill(&mut self.start_date, &other.start_date);
        fill(&mut self.end_date, &other.end_date);
        union_evidence(&mut self.evidence, &other.evidence);
    }
}

fn merge_list<T: Mergeable + Clone>(target: &mut Vec<T>, additions: &[T]) {
    for item in additions {
        let position = item.identity().and_then(|id| {
            target
                .iter()
                .position(|t| t.identity().as_deref() == Some(id.as_str()))
        });
        match position {
            Some(index) => target[index].absorb(item),
            None => target.push(item.clone()),
        }
    }
}

fn merge_person(target: &mut PersonInfo, other: &PersonInfo) {
    fill(&mut target.first_name, &other.first_name);
    fill(&mut target.last_name, &other.last_name);
    fill(&mut target.date_of_birth, &other.date_of_birth);
    fill(&mut target.nationality, &other.nationality);
    union_evidence(&mut target.evidence, &other.evidence);
}

fn merge_contact(target: &mut ContactInfo, other: &ContactInfo) {
    fill(&mut target.email, &other.email);
    fill(&mut target.phone, &other.phone);
    fill(&mut target.address, &other.address);
    fill(&mut target.linkedin, &other.linkedin);
    fill(&mut target.website, &other.website);
    union_evidence(&mut target.evidence, &other.evidence);
}

fn merge_metadata(target: &mut ResponseMetadata, other: &ResponseMetadata) {
    fill(&mut target.document_language, &other.document_language);
    if target.total_lines_processed.is_none() {
        target.total_lines_processed = other.total_lines_processed;
    }
    fill(&mut target.extraction_notes, &other.extraction_notes);
}

fn merge_segments(target: &mut Vec<UnmappedSegment>, additions: &[UnmappedSegment]) {
    let same = |a: &UnmappedSegment, b: &UnmappedSegment| {
        a.line_reference == b.line_reference
            && a.original_text.trim().eq_ignore_ascii_case(b.original_text.trim())
    };
    for seg in additions {
        if !target.iter().any(|t| same(t, seg)) {
            target.push(seg.clone());
        }
    }
}

/// Returns a new response: `primary` extended by `supplement`.
pub fn merge_responses(
    primary: &CognitiveResponse,
    supplement: &CognitiveResponse,
) -> CognitiveResponse {
    let mut merged = primary.clone();

    if !supplement.thought_process.trim().is_empty() {
        merged.thought_process = format!(
            "{}\n\n[Re-extraction] {}",
            primary.thought_process.trim_end(),
            supplement.thought_process.trim()
        );
    }

    let data = &mut merged.extracted_data;
    let extra = &supplement.extracted_data;
    merge_person(&mut data.person, &extra.person);
    merge_contact(&mut data.contact, &extra.contact);
    merge_list(&mut data.languages, &extra.languages);
    merge_list(&mut data.skills, &extra.skills);
    merge_list(&mut data.experience, &extra.experience);
    merge_list(&mut data.education, &extra.education);

    merge_segments(&mut merged.unmapped_segments, &supplement.unmapped_segments);
    merge_metadata(&mut merged.metadata, &supplement.metadata);

    merged
}
