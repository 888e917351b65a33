use std::{cmp::Reverse, collections::HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{Modified, Mutation, Store, StoreError, StoreResult};
use crate::models::{
    ChangeRequest, Document, DocumentShare, NewUser, Project, ProjectAssignment,
    ProjectInvitation, ProjectTask, ProjectUpdate, Session, User, WorkOrder, WorkOrderMaterial,
    WorkOrderSignature,
};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    sessions: HashMap<String, Session>,
    projects: HashMap<Uuid, Project>,
    assignments: Vec<ProjectAssignment>,
    tasks: HashMap<Uuid, ProjectTask>,
    updates: Vec<ProjectUpdate>,
    invitations: HashMap<Uuid, ProjectInvitation>,
    change_requests: HashMap<Uuid, ChangeRequest>,
    work_order_sequence: i64,
    work_orders: HashMap<Uuid, WorkOrder>,
    materials: Vec<WorkOrderMaterial>,
    signatures: Vec<WorkOrderSignature>,
    documents: HashMap<Uuid, Document>,
    shares: HashMap<(Uuid, Uuid), DocumentShare>,
}

/// Store kept entirely in process memory. One lock guards all tables, which
/// gives every operation the same atomicity a database transaction would.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted_by<T, K: Ord>(mut rows: Vec<T>, key: impl Fn(&T) -> K) -> Vec<T> {
    rows.sort_by_key(|row| key(row));
    rows
}

fn modify<T: Clone>(row: Option<&mut T>, mutation: Mutation<T>) -> Option<Modified<T>> {
    row.map(|row| {
        let before = row.clone();
        mutation(&mut *row);
        Modified {
            before,
            after: row.clone(),
        }
    })
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_user(&self, user: NewUser) -> StoreResult<User> {
        let mut tables = self.tables.lock().await;
        if tables.users.values().any(|existing| existing.email == user.email) {
            return Err(StoreError::Conflict("email"));
        }
        let user = User {
            id: Uuid::new_v4(),
            email: user.email,
            password_hash: user.password_hash,
            first_name: user.first_name,
            last_name: user.last_name,
            role: user.role,
            created_at: Utc::now(),
        };
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.tables.lock().await.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let tables = self.tables.lock().await;
        Ok(tables.users.values().find(|user| user.email == email).cloned())
    }

    async fn list_users(&self) -> StoreResult<Vec<User>> {
        let tables = self.tables.lock().await;
        let users: Vec<User> = tables.users.values().cloned().collect();
        Ok(sorted_by(users, |user: &User| user.email.clone()))
    }

    async fn insert_session(&self, session: Session) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        tables.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn find_session(&self, id: &str) -> StoreResult<Option<Session>> {
        Ok(self.tables.lock().await.sessions.get(id).cloned())
    }

    async fn delete_session(&self, id: &str) -> StoreResult<bool> {
        Ok(self.tables.lock().await.sessions.remove(id).is_some())
    }

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        let before = tables.sessions.len();
        tables.sessions.retain(|_, session| session.is_valid_at(now));
        Ok((before - tables.sessions.len()) as u64)
    }

    async fn insert_project(&self, project: Project) -> StoreResult<()> {
        self.tables.lock().await.projects.insert(project.id, project);
        Ok(())
    }

    async fn find_project(&self, id: Uuid) -> StoreResult<Option<Project>> {
        Ok(self.tables.lock().await.projects.get(&id).cloned())
    }

    async fn list_projects(&self) -> StoreResult<Vec<Project>> {
        let tables = self.tables.lock().await;
        let projects: Vec<Project> = tables.projects.values().cloned().collect();
        Ok(sorted_by(projects, |p: &Project| p.created_at))
    }

    async fn list_projects_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Project>> {
        let tables = self.tables.lock().await;
        let projects: Vec<Project> = tables
            .assignments
            .iter()
            .filter(|assignment| assignment.user_id == user_id)
            .filter_map(|assignment| tables.projects.get(&assignment.project_id).cloned())
            .collect();
        Ok(sorted_by(projects, |p: &Project| p.created_at))
    }

    async fn modify_project(
        &self,
        id: Uuid,
        mutation: Mutation<Project>,
    ) -> StoreResult<Option<Modified<Project>>> {
        let mut tables = self.tables.lock().await;
        Ok(modify(tables.projects.get_mut(&id), mutation))
    }

    async fn delete_project(&self, id: Uuid) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;
        if tables.projects.remove(&id).is_none() {
            return Ok(false);
        }
        tables.assignments.retain(|a| a.project_id != id);
        tables.tasks.retain(|_, t| t.project_id != id);
        tables.updates.retain(|u| u.project_id != id);
        tables.invitations.retain(|_, i| i.project_id != id);
        tables.change_requests.retain(|_, c| c.project_id != id);
        Ok(true)
    }

    async fn insert_assignment(&self, assignment: ProjectAssignment) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;
        let exists = tables.assignments.iter().any(|existing| {
            existing.project_id == assignment.project_id && existing.user_id == assignment.user_id
        });
        if exists {
            return Ok(false);
        }
        tables.assignments.push(assignment);
        Ok(true)
    }

    async fn delete_assignment(&self, project_id: Uuid, user_id: Uuid) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;
        let before = tables.assignments.len();
        tables
            .assignments
            .retain(|a| !(a.project_id == project_id && a.user_id == user_id));
        Ok(tables.assignments.len() != before)
    }

    async fn list_assignments(&self, project_id: Uuid) -> StoreResult<Vec<ProjectAssignment>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .assignments
            .iter()
            .filter(|a| a.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn is_assigned(&self, project_id: Uuid, user_id: Uuid) -> StoreResult<bool> {
        let tables = self.tables.lock().await;
        Ok(tables
            .assignments
            .iter()
            .any(|a| a.project_id == project_id && a.user_id == user_id))
    }

    async fn insert_task(&self, task: ProjectTask) -> StoreResult<()> {
        self.tables.lock().await.tasks.insert(task.id, task);
        Ok(())
    }

    async fn list_tasks(&self, project_id: Uuid) -> StoreResult<Vec<ProjectTask>> {
        let tables = self.tables.lock().await;
        let tasks: Vec<ProjectTask> = tables
            .tasks
            .values()
            .filter(|t| t.project_id == project_id)
            .cloned()
            .collect();
        Ok(sorted_by(tasks, |t: &ProjectTask| t.created_at))
    }

    async fn modify_task(
        &self,
        project_id: Uuid,
        task_id: Uuid,
        mutation: Mutation<ProjectTask>,
    ) -> StoreResult<Option<Modified<ProjectTask>>> {
        let mut tables = self.tables.lock().await;
        let row = tables
            .tasks
            .get_mut(&task_id)
            .filter(|t| t.project_id == project_id);
        Ok(modify(row, mutation))
    }

    async fn delete_task(&self, project_id: Uuid, task_id: Uuid) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;
        let belongs = tables
            .tasks
            .get(&task_id)
            .is_some_and(|t| t.project_id == project_id);
        if belongs {
            tables.tasks.remove(&task_id);
        }
        Ok(belongs)
    }

    async fn insert_project_update(&self, update: ProjectUpdate) -> StoreResult<()> {
        self.tables.lock().await.updates.push(update);
        Ok(())
    }

    async fn list_project_updates(&self, project_id: Uuid) -> StoreResult<Vec<ProjectUpdate>> {
        let tables = self.tables.lock().await;
        let updates: Vec<ProjectUpdate> = tables
            .updates
            .iter()
            .filter(|u| u.project_id == project_id)
            .cloned()
            .collect();
        Ok(sorted_by(updates, |u: &ProjectUpdate| Reverse(u.created_at)))
    }

    async fn insert_invitation(&self, invitation: ProjectInvitation) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        tables.invitations.insert(invitation.id, invitation);
        Ok(())
    }

    async fn list_invitations(&self, project_id: Uuid) -> StoreResult<Vec<ProjectInvitation>> {
        let tables = self.tables.lock().await;
        let invitations: Vec<ProjectInvitation> = tables
            .invitations
            .values()
            .filter(|i| i.project_id == project_id)
            .cloned()
            .collect();
        Ok(sorted_by(invitations, |i: &ProjectInvitation| i.created_at))
    }

    async fn find_invitation_by_token(
        &self,
        token_hash: &str,
    ) -> StoreResult<Option<ProjectInvitation>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .invitations
            .values()
            .find(|i| i.token_hash == token_hash)
            .cloned())
    }

    async fn accept_invitation(
        &self,
        id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;
        match tables.invitations.get_mut(&id) {
            Some(invitation) if invitation.accepted_at.is_none() => {
                invitation.accepted_at = Some(now);
                invitation.accepted_by = Some(user_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_change_request(&self, request: ChangeRequest) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        tables.change_requests.insert(request.id, request);
        Ok(())
    }

    async fn find_change_request(
        &self,
        project_id: Uuid,
        id: Uuid,
    ) -> StoreResult<Option<ChangeRequest>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .change_requests
            .get(&id)
            .filter(|c| c.project_id == project_id)
            .cloned())
    }

    async fn list_change_requests(&self, project_id: Uuid) -> StoreResult<Vec<ChangeRequest>> {
        let tables = self.tables.lock().await;
        let requests: Vec<ChangeRequest> = tables
            .change_requests
            .values()
            .filter(|c| c.project_id == project_id)
            .cloned()
            .collect();
        Ok(sorted_by(requests, |c: &ChangeRequest| c.created_at))
    }

    async fn modify_change_request(
        &self,
        project_id: Uuid,
        id: Uuid,
        mutation: Mutation<ChangeRequest>,
    ) -> StoreResult<Option<Modified<ChangeRequest>>> {
        let mut tables = self.tables.lock().await;
        let row = tables
            .change_requests
            .get_mut(&id)
            .filter(|c| c.project_id == project_id);
        Ok(modify(row, mutation))
    }

    async fn next_work_order_sequence(&self) -> StoreResult<i64> {
        let mut tables = self.tables.lock().await;
        tables.work_order_sequence += 1;
        Ok(tables.work_order_sequence)
    }

    async fn insert_work_order(&self, order: WorkOrder) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if tables
            .work_orders
            .values()
            .any(|existing| existing.work_order_number == order.work_order_number)
        {
            return Err(StoreError::Conflict("work order number"));
        }
        tables.work_orders.insert(order.id, order);
        Ok(())
    }

    async fn find_work_order(&self, id: Uuid) -> StoreResult<Option<WorkOrder>> {
        Ok(self.tables.lock().await.work_orders.get(&id).cloned())
    }

    async fn list_work_orders(&self, assignee: Option<Uuid>) -> StoreResult<Vec<WorkOrder>> {
        let tables = self.tables.lock().await;
        let orders: Vec<WorkOrder> = tables
            .work_orders
            .values()
            .filter(|order| assignee.is_none() || order.assigned_to == assignee)
            .cloned()
            .collect();
        Ok(sorted_by(orders, |o: &WorkOrder| o.work_order_number.clone()))
    }

    async fn modify_work_order(
        &self,
        id: Uuid,
        mutation: Mutation<WorkOrder>,
    ) -> StoreResult<Option<Modified<WorkOrder>>> {
        let mut tables = self.tables.lock().await;
        Ok(modify(tables.work_orders.get_mut(&id), mutation))
    }

    async fn delete_work_order(&self, id: Uuid) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;
        if tables.work_orders.remove(&id).is_none() {
            return Ok(false);
        }
        tables.materials.retain(|m| m.work_order_id != id);
        tables.signatures.retain(|s| s.work_order_id != id);
        Ok(true)
    }

    async fn insert_material(&self, material: WorkOrderMaterial) -> StoreResult<()> {
        self.tables.lock().await.materials.push(material);
        Ok(())
    }

    async fn list_materials(&self, work_order_id: Uuid) -> StoreResult<Vec<WorkOrderMaterial>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .materials
            .iter()
            .filter(|m| m.work_order_id == work_order_id)
            .cloned()
            .collect())
    }

    async fn delete_material(&self, work_order_id: Uuid, id: Uuid) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;
        let before = tables.materials.len();
        tables
            .materials
            .retain(|m| !(m.work_order_id == work_order_id && m.id == id));
        Ok(tables.materials.len() != before)
    }

    async fn insert_signature(&self, signature: WorkOrderSignature) -> StoreResult<()> {
        self.tables.lock().await.signatures.push(signature);
        Ok(())
    }

    async fn list_signatures(&self, work_order_id: Uuid) -> StoreResult<Vec<WorkOrderSignature>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .signatures
            .iter()
            .filter(|s| s.work_order_id == work_order_id)
            .cloned()
            .collect())
    }

    async fn insert_document(&self, document: Document) -> StoreResult<()> {
        self.tables.lock().await.documents.insert(document.id, document);
        Ok(())
    }

    async fn find_document(&self, id: Uuid) -> StoreResult<Option<Document>> {
        Ok(self.tables.lock().await.documents.get(&id).cloned())
    }

    async fn list_documents(&self) -> StoreResult<Vec<Document>> {
        let tables = self.tables.lock().await;
        let documents: Vec<Document> = tables.documents.values().cloned().collect();
        Ok(sorted_by(documents, |d: &Document| Reverse(d.created_at)))
    }

    async fn list_shared_documents(
        &self,
        client_id: Uuid,
    ) -> StoreResult<Vec<(Document, DocumentShare)>> {
        let tables = self.tables.lock().await;
        let rows: Vec<(Document, DocumentShare)> = tables
            .shares
            .values()
            .filter(|share| share.client_id == client_id)
            .filter_map(|share| {
                tables
                    .documents
                    .get(&share.document_id)
                    .map(|doc| (doc.clone(), share.clone()))
            })
            .collect();
        Ok(sorted_by(rows, |row: &(Document, DocumentShare)| {
            Reverse(row.0.created_at)
        }))
    }

    async fn delete_document(&self, id: Uuid) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;
        if tables.documents.remove(&id).is_none() {
            return Ok(false);
        }
        tables.shares.retain(|(document_id, _), _| *document_id != id);
        Ok(true)
    }

    async fn upsert_share(&self, share: DocumentShare) -> StoreResult<DocumentShare> {
        let mut guard = self.tables.lock().await;
        let tables = &mut *guard;
        let key = (share.document_id, share.client_id);
        let stored = match tables.shares.get_mut(&key) {
            Some(existing) => {
                existing.can_download = share.can_download;
                existing.expires_at = share.expires_at;
                existing.shared_by = share.shared_by;
                existing.updated_at = share.updated_at;
                existing.clone()
            }
            None => {
                tables.shares.insert(key, share.clone());
                share
            }
        };
        Ok(stored)
    }

    async fn find_share(
        &self,
        document_id: Uuid,
        client_id: Uuid,
    ) -> StoreResult<Option<DocumentShare>> {
        let tables = self.tables.lock().await;
        Ok(tables.shares.get(&(document_id, client_id)).cloned())
    }

    async fn list_shares(&self, document_id: Uuid) -> StoreResult<Vec<DocumentShare>> {
        let tables = self.tables.lock().await;
        let shares: Vec<DocumentShare> = tables
            .shares
            .values()
            .filter(|s| s.document_id == document_id)
            .cloned()
            .collect();
        Ok(sorted_by(shares, |s: &DocumentShare| s.created_at))
    }

    async fn delete_share(&self, document_id: Uuid, client_id: Uuid) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;
        Ok(tables.shares.remove(&(document_id, client_id)).is_some())
    }

    async fn stamp_share_viewed(
        &self,
        document_id: Uuid,
        client_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<DocumentShare>> {
        let mut tables = self.tables.lock().await;
        Ok(tables.shares.get_mut(&(document_id, client_id)).map(|share| {
            share.viewed_at.get_or_insert(now);
            share.clone()
        }))
    }

    async fn stamp_share_downloaded(
        &self,
        document_id: Uuid,
        client_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<DocumentShare>> {
        let mut tables = self.tables.lock().await;
        Ok(tables.shares.get_mut(&(document_id, client_id)).map(|share| {
            share.downloaded_at.get_or_insert(now);
            share.clone()
        }))
    }
}
