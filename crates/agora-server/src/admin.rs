//! Administrative mutations of the room graph.
//!
//! Only workspace administrators may change a room's kind or add and remove
//! links. The actor's role is asserted by the authenticated gateway.

use agora_shared::protocol::Actor;
use agora_shared::{LinkKind, RoomId, RoomKind, RoomLinkId, WorkspaceId};
use agora_store::{Room, RoomLink};
use tracing::info;

use crate::error::ServerError;
use crate::store::Store;

fn require_admin(actor: &Actor, action: &str) -> Result<(), ServerError> {
    if actor.is_workspace_admin() {
        Ok(())
    } else {
        Err(ServerError::Forbidden(format!(
            "{action} requires workspace admin"
        )))
    }
}

pub fn set_room_kind(
    store: &Store,
    actor: &Actor,
    ws: WorkspaceId,
    room_id: RoomId,
    kind: RoomKind,
) -> Result<Room, ServerError> {
    require_admin(actor, "changing a room kind")?;
    let room = store.with(|db| db.set_room_kind(ws, room_id, kind))?;
    info!(room = %room.id, kind = %kind, actor = %actor.user_id, "Room kind changed");
    Ok(room)
}

pub fn create_room_link(
    store: &Store,
    actor: &Actor,
    ws: WorkspaceId,
    source: RoomId,
    target: RoomId,
    kind: LinkKind,
) -> Result<RoomLink, ServerError> {
    require_admin(actor, "linking rooms")?;
    let link = store.with(|db| db.create_room_link(ws, source, target, kind))?;
    info!(link = %link.id, source = %source, target = %target, kind = %kind, "Room link created");
    Ok(link)
}

pub fn delete_room_link(
    store: &Store,
    actor: &Actor,
    ws: WorkspaceId,
    link_id: RoomLinkId,
) -> Result<(), ServerError> {
    require_admin(actor, "unlinking rooms")?;
    if !store.with(|db| db.delete_room_link(ws, link_id))? {
        return Err(ServerError::NotFound(format!("Room link {link_id}")));
    }
    info!(link = %link_id, actor = %actor.user_id, "Room link deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use agora_shared::protocol::ActorRole;

    use super::*;

    fn actor(role: ActorRole) -> Actor {
        Actor {
            user_id: "u-1".into(),
            role,
        }
    }

    fn setup() -> (Store, WorkspaceId, Room, Room) {
        let store = Store::in_memory();
        let (ws, general, digest) = store
            .with(|db| {
                let ws = db.ensure_workspace("acme", "Acme")?.id;
                let general = db.ensure_room(ws, "c-general", "general")?;
                let digest = db.ensure_room(ws, "c-digest", "digest")?;
                Ok((ws, general, digest))
            })
            .unwrap();
        (store, ws, general, digest)
    }

    #[test]
    fn members_cannot_change_the_graph() {
        let (store, ws, general, digest) = setup();
        let member = actor(ActorRole::Member);

        assert!(matches!(
            set_room_kind(&store, &member, ws, digest.id, RoomKind::Aggregate),
            Err(ServerError::Forbidden(_))
        ));
        assert!(matches!(
            create_room_link(&store, &member, ws, general.id, digest.id, LinkKind::OneWay),
            Err(ServerError::Forbidden(_))
        ));
        assert!(matches!(
            delete_room_link(&store, &member, ws, RoomLinkId::new()),
            Err(ServerError::Forbidden(_))
        ));

        let unchanged = store.with(|db| db.get_room(ws, digest.id)).unwrap();
        assert_eq!(unchanged.kind, RoomKind::Standard);
    }

    #[test]
    fn admin_builds_and_removes_links() {
        let (store, ws, general, digest) = setup();
        let admin = actor(ActorRole::WorkspaceAdmin);

        let room = set_room_kind(&store, &admin, ws, digest.id, RoomKind::Aggregate).unwrap();
        assert!(room.is_aggregate());

        let link =
            create_room_link(&store, &admin, ws, general.id, digest.id, LinkKind::OneWay).unwrap();
        let targets = store
            .with(|db| db.linked_aggregate_targets(ws, general.id))
            .unwrap();
        assert_eq!(targets.len(), 1);

        delete_room_link(&store, &admin, ws, link.id).unwrap();
        assert!(matches!(
            delete_room_link(&store, &admin, ws, link.id),
            Err(ServerError::NotFound(_))
        ));
    }

    #[test]
    fn admin_of_one_workspace_cannot_reach_another() {
        let (store, ws, general, _) = setup();
        let other = store
            .with(|db| db.ensure_workspace("globex", "Globex"))
            .unwrap();
        let admin = actor(ActorRole::WorkspaceAdmin);

        assert!(matches!(
            set_room_kind(&store, &admin, other.id, general.id, RoomKind::Aggregate),
            Err(ServerError::NotFound(_))
        ));
        let unchanged = store.with(|db| db.get_room(ws, general.id)).unwrap();
        assert_eq!(unchanged.kind, RoomKind::Standard);
    }
}
