//! Well-known GroupVersionKinds handled by the syncer.

use kube::core::GroupVersionKind;

fn core_v1(kind: &str) -> GroupVersionKind { GroupVersionKind::gvk("", "v1", kind) }

pub fn secrets() -> GroupVersionKind { core_v1("Secret") }
pub fn config_maps() -> GroupVersionKind { core_v1("ConfigMap") }
pub fn services() -> GroupVersionKind { core_v1("Service") }
pub fn service_accounts() -> GroupVersionKind { core_v1("ServiceAccount") }
pub fn pods() -> GroupVersionKind { core_v1("Pod") }
pub fn endpoints() -> GroupVersionKind { core_v1("Endpoints") }
pub fn events() -> GroupVersionKind { core_v1("Event") }
pub fn namespaces() -> GroupVersionKind { core_v1("Namespace") }
pub fn nodes() -> GroupVersionKind { core_v1("Node") }
pub fn persistent_volumes() -> GroupVersionKind { core_v1("PersistentVolume") }
pub fn persistent_volume_claims() -> GroupVersionKind { core_v1("PersistentVolumeClaim") }

pub fn storage_classes() -> GroupVersionKind { GroupVersionKind::gvk("storage.k8s.io", "v1", "StorageClass") }
pub fn csi_drivers() -> GroupVersionKind { GroupVersionKind::gvk("storage.k8s.io", "v1", "CSIDriver") }
pub fn csi_nodes() -> GroupVersionKind { GroupVersionKind::gvk("storage.k8s.io", "v1", "CSINode") }
pub fn csi_storage_capacities() -> GroupVersionKind { GroupVersionKind::gvk("storage.k8s.io", "v1", "CSIStorageCapacity") }

pub fn ingresses() -> GroupVersionKind { GroupVersionKind::gvk("networking.k8s.io", "v1", "Ingress") }
pub fn ingress_classes() -> GroupVersionKind { GroupVersionKind::gvk("networking.k8s.io", "v1", "IngressClass") }
pub fn network_policies() -> GroupVersionKind { GroupVersionKind::gvk("networking.k8s.io", "v1", "NetworkPolicy") }

pub fn pod_disruption_budgets() -> GroupVersionKind { GroupVersionKind::gvk("policy", "v1", "PodDisruptionBudget") }
pub fn priority_classes() -> GroupVersionKind { GroupVersionKind::gvk("scheduling.k8s.io", "v1", "PriorityClass") }

pub fn volume_snapshots() -> GroupVersionKind { GroupVersionKind::gvk("snapshot.storage.k8s.io", "v1", "VolumeSnapshot") }
pub fn volume_snapshot_classes() -> GroupVersionKind { GroupVersionKind::gvk("snapshot.storage.k8s.io", "v1", "VolumeSnapshotClass") }
pub fn volume_snapshot_contents() -> GroupVersionKind { GroupVersionKind::gvk("snapshot.storage.k8s.io", "v1", "VolumeSnapshotContent") }
