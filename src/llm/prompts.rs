/// Switches that shape the creative-director system instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemPromptOptions {
    pub nsfw: bool,
    pub same_location: bool,
    /// Variations to ask for (1–10).
    pub count: u8,
    /// Refine the user's prompt instead of riffing on it.
    pub enhance: bool,
}

impl Default for SystemPromptOptions {
    fn default() -> Self {
        Self {
            nsfw: false,
            same_location: false,
            count: 10,
            enhance: false,
        }
    }
}

/// Build the system instruction sent with every generation request.
pub fn system_prompt(opts: &SystemPromptOptions) -> String {
    let count = opts.count.clamp(1, 10);
    let noun = if count == 1 { "variation" } else { "variations" };

    let task = if opts.enhance {
        format!(
            "Your task is to enhance the given prompt into {count} refined {noun}. \
             Keep the subject and intent of the original intact; add precision, \
             professional vocabulary and visual detail rather than new ideas."
        )
    } else {
        format!(
            "Your task is to create {count} unique, comprehensive {noun} of the given prompt."
        )
    };

    let content_rule = if opts.nsfw {
        "Mature content is allowed but must stay tasteful and artistic"
    } else {
        "Keep all content family-friendly"
    };

    let location_rule = if opts.same_location {
        "\n- Every variation must keep the same location and setting as the original prompt"
    } else {
        ""
    };

    format!(
        r#"You are an expert creative director and art director who writes highly detailed, professional prompts.
{task}
Wrap each variation in numbered variation tags.

Format each variation exactly as:
<variation1>
prompt: [detailed prompt with artistic direction, on one line]
description: [explanation of the creative vision, on one line]
category: [photography/digital art/3D/illustration/etc]
tags: ["tag1", "tag2", "tag3", "tag4", "tag5"]
</variation1>

In each prompt cover:
1. Subject and composition: pose, expression, framing, background, depth
2. Technical specifications: camera and lens, or rendering style
3. Lighting and atmosphere: key and fill light, shadows, mood
4. Color and style: palette, influences, textures, post-processing
5. Supporting elements: props, environment, time of day or season

Guidelines:
- Make each variation twice as detailed as a standard prompt
- {content_rule}{location_rule}
- Use professional, industry-standard terminology
- Every variation must take a distinct approach
- Focus on cinematic, visually striking scenes with an emotional or narrative hook
- The tags line must be a valid JSON array of strings

Respond ONLY with the variations, no additional text."#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_prompt_mentions_format() {
        let prompt = system_prompt(&SystemPromptOptions::default());
        assert!(prompt.contains("create 10 unique"));
        assert!(prompt.contains("<variation1>"));
        assert!(prompt.contains("</variation1>"));
        assert!(prompt.contains("family-friendly"));
        assert!(!prompt.contains("same location"));
    }

    #[test]
    fn test_switches_change_rules() {
        let prompt = system_prompt(&SystemPromptOptions {
            nsfw: true,
            same_location: true,
            count: 1,
            enhance: true,
        });
        assert!(prompt.contains("1 refined variation."));
        assert!(prompt.contains("Mature content is allowed"));
        assert!(prompt.contains("same location"));
    }

    #[test]
    fn test_count_is_clamped() {
        let prompt = system_prompt(&SystemPromptOptions {
            count: 0,
            ..Default::default()
        });
        assert!(prompt.contains("create 1 unique"));
    }
}
