// ADSMITH Planner - Strategist & Scriptwriter Calls
// Copyright (c) 2026 AdSmith Collective | ADSMITH
//
// Two sequential LLM calls: the strategist gets the long creative budget,
// the scriptwriter is conditioned on the strategy. Both demand structured
// output; the adapters enforce schema and re-ask on malformed JSON.

use crate::config::{ProjectConfig, MIN_SCENE_SECONDS};
use crate::error::{PipelineError, Result};
use crate::project::{ProjectState, Scene, Script, ScriptLine, Strategy, TimeRange};
use crate::providers::ProviderSet;
use crate::style::infer_style_profile;
use serde_json::Value;
use std::time::Instant;
use tracing::info;

const STRATEGIST_SYSTEM: &str = "You are a senior commercial strategist. You turn product \
briefs into production-ready creative strategy for short-form video spots.";

const STRATEGY_SCHEMA: &str = r#"{"core_concept": "...", "visual_language": "...", "narrative_arc": "...", "audience_hook": "...", "cinematic_direction": "...", "production_recommendations": "..."}"#;

const SCRIPTWRITER_SYSTEM: &str = "You are a commercial scriptwriter. You break a creative \
strategy into discrete scenes with visual and motion prompts, plus timed voiceover lines.";

const SCRIPT_SCHEMA: &str = r#"{"mood": "...", "scenes": [{"id": 1, "duration_seconds": 4, "visual_prompt": "...", "motion_prompt": "...", "audio_prompt": "...", "primary_subject": "...", "subject_description": "..."}], "lines": [{"speaker": "...", "text": "...", "start_s": 0.0, "end_s": 2.0}]}"#;

/// Run both planning calls and populate strategy, script and style profile
/// on the project. The caller owns the surrounding state transitions.
pub async fn plan(state: &mut ProjectState, providers: &ProviderSet) -> Result<()> {
    let started = Instant::now();
    let config = state.config.clone();

    state.log("PLANNER", format!("Planning '{}' ({}s spot)", config.topic, config.duration_seconds));

    let strategy_value = providers
        .strategist
        .generate_json(STRATEGIST_SYSTEM, &strategist_prompt(&config), STRATEGY_SCHEMA)
        .await?;
    let strategy = parse_strategy(&strategy_value);
    state.log("PLANNER", format!("Strategy locked: {}", strategy.core_concept));

    let script_value = providers
        .scriptwriter
        .generate_json(
            SCRIPTWRITER_SYSTEM,
            &scriptwriter_prompt(&config, &strategy),
            SCRIPT_SCHEMA,
        )
        .await?;
    let mut script = parse_script(&script_value)?;
    normalize_durations(&mut script, &config, state);
    script.validate()?;

    let profile = infer_style_profile(&config);
    state.log(
        "PLANNER",
        format!(
            "Script ready: {} scenes, {} lines, mood '{}'",
            script.scenes.len(),
            script.lines.len(),
            script.mood
        ),
    );
    info!("[PERF] planner finished in {}ms", started.elapsed().as_millis());

    state.strategy = Some(strategy);
    state.script = Some(script);
    state.style_profile = Some(profile);
    Ok(())
}

fn strategist_prompt(config: &ProjectConfig) -> String {
    let mut prompt = format!(
        "Topic: {}\nStyle: {:?}\nPlatform: {:?}\nTotal duration: {} seconds.\nAspect ratio: {}.",
        config.topic,
        config.style,
        config.platform,
        config.duration_seconds,
        config.aspect_ratio.as_str()
    );
    if !config.references.is_empty() {
        prompt.push_str(&format!(
            "\nVisual references provided: {}.",
            config.capped_references().join(", ")
        ));
    }
    if let Some(notes) = &config.research_notes {
        prompt.push_str(&format!("\nResearch notes:\n{}", notes));
    }
    prompt
}

fn scriptwriter_prompt(config: &ProjectConfig, strategy: &Strategy) -> String {
    format!(
        "Topic: {}\nTotal duration: {} seconds.\nScene minimum: {} seconds each.\n\
         Core concept: {}\nVisual language: {}\nNarrative arc: {}\nCinematic direction: {}\n\
         Every scene keeps the same primary subject. Voiceover lines must fit inside the total duration.",
        config.topic,
        config.duration_seconds,
        MIN_SCENE_SECONDS,
        strategy.core_concept,
        strategy.visual_language,
        strategy.narrative_arc,
        strategy.cinematic_direction,
    )
}

fn parse_strategy(value: &Value) -> Strategy {
    let field = |k: &str| value[k].as_str().unwrap_or("").to_string();
    Strategy {
        core_concept: field("core_concept"),
        visual_language: field("visual_language"),
        narrative_arc: field("narrative_arc"),
        audience_hook: field("audience_hook"),
        cinematic_direction: field("cinematic_direction"),
        production_recommendations: field("production_recommendations"),
    }
}

fn parse_script(value: &Value) -> Result<Script> {
    let scenes_raw = value["scenes"]
        .as_array()
        .ok_or_else(|| PipelineError::InvalidInput("script missing scenes".into()))?;

    let mut scenes = Vec::with_capacity(scenes_raw.len());
    for (i, raw) in scenes_raw.iter().enumerate() {
        scenes.push(Scene {
            // Re-number densely; LLMs occasionally skip ids.
            id: (i as u32) + 1,
            duration_seconds: raw["duration_seconds"].as_u64().unwrap_or(0) as u32,
            visual_prompt: raw["visual_prompt"]
                .as_str()
                .map(|s| s.to_string())
                .ok_or_else(|| {
                    PipelineError::InvalidInput(format!("scene {} missing visual_prompt", i + 1))
                })?,
            motion_prompt: raw["motion_prompt"].as_str().unwrap_or("subtle camera drift").to_string(),
            audio_prompt: raw["audio_prompt"].as_str().map(|s| s.to_string()),
            primary_subject: raw["primary_subject"].as_str().map(|s| s.to_string()),
            subject_description: raw["subject_description"].as_str().map(|s| s.to_string()),
            subject_reference_path: None,
            image_path: None,
            image_fingerprint: None,
            image_critique: None,
            image_score: None,
            image_warning: None,
            video_path: None,
            video_provider: None,
            video_warning: None,
        });
    }

    let mut lines = Vec::new();
    if let Some(lines_raw) = value["lines"].as_array() {
        for raw in lines_raw {
            let text = match raw["text"].as_str() {
                Some(t) if !t.trim().is_empty() => t.to_string(),
                _ => continue,
            };
            lines.push(ScriptLine {
                speaker: raw["speaker"].as_str().unwrap_or("Narrator").to_string(),
                text,
                time_range: TimeRange {
                    start_s: raw["start_s"].as_f64().unwrap_or(0.0).max(0.0),
                    end_s: raw["end_s"].as_f64(),
                },
                voice_id: raw["voice_id"].as_str().map(|s| s.to_string()),
                audio_path: None,
            });
        }
    }

    Ok(Script {
        mood: value["mood"].as_str().unwrap_or("confident").to_string(),
        scenes,
        lines,
    })
}

/// Clamp every scene to the provider minimum and rebalance so the total
/// matches the requested duration exactly. Every adjustment is logged,
/// never silent.
fn normalize_durations(script: &mut Script, config: &ProjectConfig, state: &mut ProjectState) {
    let target = config.duration_seconds;

    // Too many scenes for the runtime: drop from the tail.
    let max_scenes = (target / MIN_SCENE_SECONDS).max(1) as usize;
    if script.scenes.len() > max_scenes {
        state.log(
            "PLANNER",
            format!(
                "Dropping {} trailing scene(s); {}s only fits {}",
                script.scenes.len() - max_scenes,
                target,
                max_scenes
            ),
        );
        script.scenes.truncate(max_scenes);
    }

    for scene in script.scenes.iter_mut() {
        if scene.duration_seconds < MIN_SCENE_SECONDS {
            state.log(
                "PLANNER",
                format!(
                    "Scene {} duration {}s below provider minimum, clamped to {}s",
                    scene.id, scene.duration_seconds, MIN_SCENE_SECONDS
                ),
            );
            scene.duration_seconds = MIN_SCENE_SECONDS;
        }
    }

    // Rebalance to the exact target: trim the longest scenes first, then
    // pour any shortfall into the last scene.
    let mut total: u32 = script.scenes.iter().map(|s| s.duration_seconds).sum();
    while total > target {
        let longest = script
            .scenes
            .iter_mut()
            .max_by_key(|s| s.duration_seconds)
            .expect("scenes non-empty");
        if longest.duration_seconds <= MIN_SCENE_SECONDS {
            break; // every scene at minimum; target unreachable without dropping scenes
        }
        longest.duration_seconds -= 1;
        total -= 1;
    }
    if total < target {
        if let Some(last) = script.scenes.last_mut() {
            last.duration_seconds += target - total;
        }
    }
    let final_total: u32 = script.scenes.iter().map(|s| s.duration_seconds).sum();
    if final_total != target {
        state.log(
            "PLANNER",
            format!(
                "Scene durations sum to {}s against a {}s brief after clamping",
                final_total, target
            ),
        );
    }

    // Lines must start inside the spot.
    for line in script.lines.iter_mut() {
        let cap = target as f64;
        if line.time_range.start_s >= cap {
            state.log(
                "PLANNER",
                format!("Line '{}' starts past the end, pulled inside", line.speaker),
            );
            line.time_range.start_s = (cap - 2.0).max(0.0);
            line.time_range.end_s = None;
        }
        if let Some(end) = line.time_range.end_s {
            if end <= line.time_range.start_s {
                line.time_range.end_s = None;
            } else if end > cap {
                line.time_range.end_s = Some(cap);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::ProjectState;

    fn state_with(duration: u32) -> ProjectState {
        ProjectState::new(
            "p".into(),
            1,
            ProjectConfig {
                topic: "luxury watch ad".into(),
                duration_seconds: duration,
                ..Default::default()
            },
        )
    }

    fn scene(id: u32, duration: u32) -> Scene {
        Scene {
            id,
            duration_seconds: duration,
            visual_prompt: "v".into(),
            motion_prompt: "m".into(),
            audio_prompt: None,
            primary_subject: None,
            subject_description: None,
            subject_reference_path: None,
            image_path: None,
            image_fingerprint: None,
            image_critique: None,
            image_score: None,
            image_warning: None,
            video_path: None,
            video_provider: None,
            video_warning: None,
        }
    }

    #[test]
    fn test_clamp_below_minimum_logs() {
        let mut st = state_with(12);
        let mut script = Script {
            mood: "m".into(),
            scenes: vec![scene(1, 2), scene(2, 5), scene(3, 5)],
            lines: vec![],
        };
        normalize_durations(&mut script, &st.config.clone(), &mut st);
        assert!(script.scenes.iter().all(|s| s.duration_seconds >= 4));
        assert_eq!(script.total_duration_seconds(), 12);
        assert!(st.logs.iter().any(|l| l.message.contains("below provider minimum")));
    }

    #[test]
    fn test_rebalance_trims_longest() {
        let mut st = state_with(12);
        let mut script = Script {
            mood: "m".into(),
            scenes: vec![scene(1, 8), scene(2, 8)],
            lines: vec![],
        };
        normalize_durations(&mut script, &st.config.clone(), &mut st);
        assert_eq!(script.total_duration_seconds(), 12);
    }

    #[test]
    fn test_excess_scenes_dropped() {
        let mut st = state_with(8);
        let mut script = Script {
            mood: "m".into(),
            scenes: (1..=4).map(|i| scene(i, 4)).collect(),
            lines: vec![],
        };
        normalize_durations(&mut script, &st.config.clone(), &mut st);
        assert_eq!(script.scenes.len(), 2);
        assert_eq!(script.total_duration_seconds(), 8);
    }

    #[tokio::test]
    async fn test_plan_offline_end_to_end() {
        let providers = ProviderSet::offline(42);
        let mut st = state_with(12);
        plan(&mut st, &providers).await.unwrap();
        let script = st.script.as_ref().unwrap();
        assert!((2..=4).contains(&script.scenes.len()));
        assert_eq!(script.total_duration_seconds(), 12);
        assert!(st.strategy.is_some());
        assert!(st.style_profile.is_some());
        assert!(!script.lines.is_empty());
    }
}
