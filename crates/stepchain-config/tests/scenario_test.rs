use serde_json::json;
use stepchain_config::{ConfigError, ScenarioDef};

fn nested_scenario() -> serde_json::Value {
  json!({
    "name": "nested",
    "steps": [
      { "step_id": "load", "output": { "user": "ada" } },
      { "step_id": "enrich", "delay_ms": 5 },
      {
        "step_id": "notify",
        "forks": [
          {
            "fork_id": "audit",
            "steps": [
              { "step_id": "write" },
              { "step_id": "flush", "fail": "disk full" }
            ]
          }
        ]
      }
    ]
  })
}

#[test]
fn test_parse_nested_scenario() {
  let scenario = ScenarioDef::from_json(&nested_scenario().to_string()).unwrap();

  assert_eq!(scenario.name, "nested");
  assert_eq!(scenario.steps.len(), 3);
  assert_eq!(scenario.steps[0].output, Some(json!({ "user": "ada" })));
  assert_eq!(scenario.steps[1].delay_ms, Some(5));

  let audit = &scenario.steps[2].forks[0];
  assert_eq!(audit.fork_id, "audit");
  assert!(audit.steps[1].fails());
  assert_eq!(scenario.step_count(), 5);
}

#[test]
fn test_serialization_skips_unset_fields() {
  let scenario = ScenarioDef::from_json(&nested_scenario().to_string()).unwrap();
  let value = serde_json::to_value(&scenario).unwrap();

  let enrich = &value["steps"][1];
  assert_eq!(enrich["delay_ms"], 5);
  assert!(enrich.get("output").is_none());
  assert!(enrich.get("forks").is_none());
}

#[test]
fn test_empty_scenario_is_rejected() {
  let err = ScenarioDef::from_json(r#"{ "name": "empty", "steps": [] }"#).unwrap_err();

  assert!(matches!(err, ConfigError::EmptyChain(ref chain) if chain == "empty"));
}

#[test]
fn test_duplicate_step_ids_are_rejected() {
  let json = json!({
    "name": "dup",
    "steps": [{ "step_id": "a" }, { "step_id": "a" }]
  });

  let err = ScenarioDef::from_json(&json.to_string()).unwrap_err();

  assert_eq!(err.to_string(), "duplicate step id 'a' in chain 'dup'");
}

#[test]
fn test_duplicate_fork_ids_are_rejected() {
  let json = json!({
    "name": "dup",
    "steps": [{
      "step_id": "a",
      "forks": [
        { "fork_id": "f", "steps": [{ "step_id": "x" }] },
        { "fork_id": "f", "steps": [{ "step_id": "y" }] }
      ]
    }]
  });

  let err = ScenarioDef::from_json(&json.to_string()).unwrap_err();

  assert!(matches!(
    err,
    ConfigError::DuplicateFork { ref step_path, ref fork_id } if step_path == "dup/a" && fork_id == "f"
  ));
}

#[test]
fn test_malformed_json_is_a_parse_error() {
  let err = ScenarioDef::from_json(r#"{ "name": "x" }"#).unwrap_err();

  assert!(matches!(err, ConfigError::Parse(_)));
}
