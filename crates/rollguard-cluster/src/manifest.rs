//! JSON helpers for cluster objects.
//!
//! Objects are plain `serde_json::Value`s in the shape the API server
//! returns. These helpers read the few fields the engines care about and
//! derive new workloads from live ones.

use std::collections::BTreeMap;

use serde_json::{Map, Value, json};

/// Canonical lower-case singular name for a resource kind.
pub fn normalize_kind(kind: &str) -> String {
    let lower = kind.trim().to_ascii_lowercase();
    let canonical = match lower.as_str() {
        "deploy" | "deployments" | "deployment.apps" | "deployments.apps" => "deployment",
        "svc" | "services" => "service",
        "cm" | "configmaps" => "configmap",
        "hpa" | "horizontalpodautoscalers" => "horizontalpodautoscaler",
        "po" | "pods" => "pod",
        "secrets" => "secret",
        "servicemonitors" => "servicemonitor",
        _ => return lower,
    };
    canonical.to_string()
}

pub fn name(object: &Value) -> Option<&str> {
    object.pointer("/metadata/name").and_then(Value::as_str)
}

pub fn namespace(object: &Value) -> Option<&str> {
    object.pointer("/metadata/namespace").and_then(Value::as_str)
}

/// The object's kind, normalized.
pub fn kind(object: &Value) -> Option<String> {
    object.get("kind").and_then(Value::as_str).map(normalize_kind)
}

/// `metadata.labels` as a map; empty if absent.
pub fn labels(object: &Value) -> BTreeMap<String, String> {
    object
        .pointer("/metadata/labels")
        .and_then(Value::as_object)
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

pub fn label<'a>(object: &'a Value, key: &str) -> Option<&'a str> {
    object
        .pointer("/metadata/labels")
        .and_then(|l| l.get(key))
        .and_then(Value::as_str)
}

/// Desired and ready replica counts of a workload.
///
/// `spec.replicas` defaults to 1 when unset, as the API server does.
pub fn replica_counts(object: &Value) -> (u32, u32) {
    let desired = object
        .pointer("/spec/replicas")
        .and_then(Value::as_u64)
        .unwrap_or(1) as u32;
    let ready = object
        .pointer("/status/readyReplicas")
        .and_then(Value::as_u64)
        .unwrap_or(0) as u32;
    (desired, ready)
}

/// Image of the named container in a workload's pod template.
pub fn container_image<'a>(object: &'a Value, container: &str) -> Option<&'a str> {
    object
        .pointer("/spec/template/spec/containers")
        .and_then(Value::as_array)?
        .iter()
        .find(|c| c.get("name").and_then(Value::as_str) == Some(container))
        .and_then(|c| c.get("image"))
        .and_then(Value::as_str)
}

/// Set the image of the named container. Returns false if there is no
/// such container.
pub fn set_container_image(object: &mut Value, container: &str, image: &str) -> bool {
    let Some(containers) = object
        .pointer_mut("/spec/template/spec/containers")
        .and_then(Value::as_array_mut)
    else {
        return false;
    };
    for c in containers.iter_mut() {
        if c.get("name").and_then(Value::as_str) == Some(container) {
            c["image"] = Value::String(image.to_string());
            return true;
        }
    }
    false
}

pub fn pod_ip(pod: &Value) -> Option<&str> {
    pod.pointer("/status/podIP").and_then(Value::as_str)
}

/// Total container restarts of a pod.
pub fn restart_count(pod: &Value) -> u32 {
    pod.pointer("/status/containerStatuses")
        .and_then(Value::as_array)
        .map(|statuses| {
            statuses
                .iter()
                .filter_map(|s| s.get("restartCount").and_then(Value::as_u64))
                .sum::<u64>() as u32
        })
        .unwrap_or(0)
}

const SERVER_METADATA: &[&str] = &[
    "resourceVersion",
    "uid",
    "generation",
    "creationTimestamp",
    "managedFields",
    "selfLink",
];

const SERVER_ANNOTATIONS: &[&str] = &[
    "kubectl.kubernetes.io/last-applied-configuration",
    "deployment.kubernetes.io/revision",
];

/// Remove fields the API server owns so the object can be re-applied.
pub fn strip_server_fields(object: &mut Value) {
    if let Some(obj) = object.as_object_mut() {
        obj.remove("status");
    }
    if let Some(meta) = object.get_mut("metadata").and_then(Value::as_object_mut) {
        for field in SERVER_METADATA {
            meta.remove(*field);
        }
        let empty = match meta.get_mut("annotations").and_then(Value::as_object_mut) {
            Some(annotations) => {
                for a in SERVER_ANNOTATIONS {
                    annotations.remove(*a);
                }
                annotations.is_empty()
            }
            None => false,
        };
        if empty {
            meta.remove("annotations");
        }
    }
}

/// A copy of `object` without server-owned fields, for comparisons.
pub fn normalized(object: &Value) -> Value {
    let mut copy = object.clone();
    strip_server_fields(&mut copy);
    copy
}

/// Derive a new workload from a live one: rename it, add labels to its
/// metadata, selector, and pod template, and point `container` at `image`.
pub fn derive_workload(
    template: &Value,
    new_name: &str,
    container: &str,
    image: &str,
    extra_labels: &[(&str, &str)],
    replicas: Option<u32>,
) -> Value {
    let mut object = normalized(template);
    ensure_object(&mut object, "/metadata");
    ensure_object(&mut object, "/spec");
    object["metadata"]["name"] = Value::String(new_name.to_string());

    for pointer in [
        "/metadata/labels",
        "/spec/selector/matchLabels",
        "/spec/template/metadata/labels",
    ] {
        ensure_object(&mut object, pointer);
        if let Some(labels) = object.pointer_mut(pointer).and_then(Value::as_object_mut) {
            for (k, v) in extra_labels {
                labels.insert(k.to_string(), Value::String(v.to_string()));
            }
        }
    }

    if let Some(n) = replicas {
        object["spec"]["replicas"] = json!(n);
    }
    set_container_image(&mut object, container, image);
    object
}

/// Create empty objects along `pointer` where missing.
fn ensure_object(object: &mut Value, pointer: &str) {
    let mut cursor = object;
    for segment in pointer.split('/').skip(1) {
        if !cursor.is_object() {
            *cursor = Value::Object(Map::new());
        }
        let Some(map) = cursor.as_object_mut() else {
            return;
        };
        cursor = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    if !cursor.is_object() {
        *cursor = Value::Object(Map::new());
    }
}

/// Apply an RFC 7386 JSON merge patch in place.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Some(patch_map) = patch.as_object() else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Some(target_map) = target.as_object_mut() {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                merge_patch(
                    target_map.entry(key.clone()).or_insert(Value::Null),
                    value,
                );
            }
        }
    }
}

/// Match labels against an equality-based selector (`a=b,c!=d`).
///
/// A term with no operator requires the key to be present.
pub fn selector_matches(selector: &str, labels: &BTreeMap<String, String>) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| {
            if let Some((k, v)) = term.split_once("!=") {
                labels.get(k.trim()).map(String::as_str) != Some(v.trim())
            } else if let Some((k, v)) = term.split_once("==").or_else(|| term.split_once('=')) {
                labels.get(k.trim()).map(String::as_str) == Some(v.trim())
            } else {
                labels.contains_key(term)
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deployment() -> Value {
        json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {
                "name": "api",
                "namespace": "prod",
                "labels": {"app": "api"},
                "resourceVersion": "1234",
                "uid": "abc",
                "annotations": {"deployment.kubernetes.io/revision": "4"}
            },
            "spec": {
                "replicas": 3,
                "selector": {"matchLabels": {"app": "api"}},
                "template": {
                    "metadata": {"labels": {"app": "api"}},
                    "spec": {"containers": [
                        {"name": "api", "image": "api:v1"},
                        {"name": "sidecar", "image": "proxy:1"}
                    ]}
                }
            },
            "status": {"readyReplicas": 2}
        })
    }

    #[test]
    fn normalizes_kind_spellings() {
        assert_eq!(normalize_kind("Deployments"), "deployment");
        assert_eq!(normalize_kind("svc"), "service");
        assert_eq!(normalize_kind("HPA"), "horizontalpodautoscaler");
        assert_eq!(normalize_kind("ServiceMonitor"), "servicemonitor");
    }

    #[test]
    fn reads_replica_counts_and_images() {
        let d = deployment();
        assert_eq!(replica_counts(&d), (3, 2));
        assert_eq!(container_image(&d, "api"), Some("api:v1"));
        assert_eq!(container_image(&d, "missing"), None);
        assert_eq!(kind(&d).as_deref(), Some("deployment"));
    }

    #[test]
    fn replicas_default_to_one() {
        let d = json!({"spec": {}});
        assert_eq!(replica_counts(&d), (1, 0));
    }

    #[test]
    fn strip_removes_server_fields() {
        let stripped = normalized(&deployment());
        assert!(stripped.get("status").is_none());
        assert!(stripped.pointer("/metadata/resourceVersion").is_none());
        assert!(stripped.pointer("/metadata/annotations").is_none());
        assert_eq!(name(&stripped), Some("api"));
    }

    #[test]
    fn derive_relabels_and_swaps_image() {
        let green = derive_workload(
            &deployment(),
            "api-green",
            "api",
            "api:v2",
            &[("color", "green")],
            None,
        );
        assert_eq!(name(&green), Some("api-green"));
        assert_eq!(label(&green, "color"), Some("green"));
        assert_eq!(
            green.pointer("/spec/selector/matchLabels/color"),
            Some(&json!("green"))
        );
        assert_eq!(
            green.pointer("/spec/template/metadata/labels/color"),
            Some(&json!("green"))
        );
        assert_eq!(container_image(&green, "api"), Some("api:v2"));
        assert_eq!(container_image(&green, "sidecar"), Some("proxy:1"));
        assert_eq!(replica_counts(&green).0, 3);
    }

    #[test]
    fn derive_creates_missing_label_maps() {
        let bare = json!({
            "kind": "Deployment",
            "metadata": {"name": "api"},
            "spec": {"template": {"spec": {"containers": [{"name": "api", "image": "a"}]}}}
        });
        let canary = derive_workload(&bare, "api-canary", "api", "b", &[("track", "canary")], Some(1));
        assert_eq!(label(&canary, "track"), Some("canary"));
        assert_eq!(replica_counts(&canary).0, 1);
    }

    #[test]
    fn merge_patch_follows_rfc7386() {
        let mut target = json!({"a": {"b": 1, "c": 2}, "d": [1, 2]});
        merge_patch(&mut target, &json!({"a": {"b": null, "e": 3}, "d": [9]}));
        assert_eq!(target, json!({"a": {"c": 2, "e": 3}, "d": [9]}));
    }

    #[test]
    fn selector_matching() {
        let mut l = BTreeMap::new();
        l.insert("app".to_string(), "api".to_string());
        l.insert("color".to_string(), "blue".to_string());
        assert!(selector_matches("app=api", &l));
        assert!(selector_matches("app=api,color=blue", &l));
        assert!(selector_matches("app==api,color!=green", &l));
        assert!(!selector_matches("app=api,color=green", &l));
        assert!(selector_matches("color", &l));
        assert!(!selector_matches("track", &l));
        assert!(selector_matches("", &l));
    }

    #[test]
    fn restart_count_sums_containers() {
        let pod = json!({"status": {"containerStatuses": [
            {"restartCount": 2}, {"restartCount": 3}
        ]}});
        assert_eq!(restart_count(&pod), 5);
        assert_eq!(restart_count(&json!({})), 0);
    }
}
