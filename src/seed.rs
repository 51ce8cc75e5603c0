use crate::db::Database;
use crate::errors::AppResult;
use crate::models::{Tree, TreeNode, TreePrompt};
use crate::tree::import_tree;

pub const SEED_PROJECT_NAME: &str = "3D Racing Game";
pub const SEED_MAIN_REQUEST: &str =
    "Build a browser-based 3D racing game with a prebuilt track, a player car, and AI opponents.";

const SEED_PROMPTS: &[(&str, &str, &[(&str, &str)])] = &[
    (
        "Project Setup",
        "Initialize the development environment and install all required dependencies.",
        &[
            ("npm create vite", "Scaffold a new React + TypeScript project using Vite as the build tool."),
            ("Install dependencies", "Add @react-three/fiber, @react-three/drei and @react-three/rapier for rendering, helpers and physics."),
            ("Create folder structure", "Organize components/, hooks/, utils/, assets/ and stores/ directories."),
        ],
    ),
    (
        "3D Environment",
        "Build the visual atmosphere and world surrounding the race track.",
        &[
            ("HDRI skybox", "Load a high dynamic range environment for sky rendering and image-based lighting."),
            ("Lighting setup", "Add a shadow-casting directional sun light and ambient fill light."),
            ("Ground plane", "Create a large textured ground mesh that receives shadows."),
        ],
    ),
    (
        "Racing Track",
        "Generate the prebuilt racing circuit with all necessary geometry and race markers.",
        &[
            ("Track spline", "Define a CatmullRomCurve3 racing line from Vector3 control points."),
            ("Track mesh", "Extrude the road cross-section along the spline and register it as a collider."),
            ("Barriers", "Generate wall colliders along both track edges from offset splines."),
            ("Checkpoints", "Place sequential sensor colliders to track progress and prevent lap-skipping."),
        ],
    ),
    (
        "Player Vehicle",
        "Implement the user-controlled car with physics and camera.",
        &[
            ("Car model", "Load a GLTF car model with separate wheel meshes."),
            ("Vehicle physics", "Drive a raycast vehicle controller on a dynamic chassis rigid body."),
            ("Keyboard controls", "Map WASD and arrow keys to throttle, braking and smoothed steering."),
            ("Chase camera", "Follow the car from behind, lerping position and look-at target each frame."),
        ],
    ),
    (
        "AI Opponents",
        "Create computer-controlled vehicles that race against the player.",
        &[
            ("Spawn AI cars", "Instantiate opponents at staggered grid positions with distinct colors."),
            ("Pathfinding", "Steer toward waypoints sampled ahead on the track spline."),
            ("Collision avoidance", "Cast rays ahead and sideways and steer away from obstacles."),
        ],
    ),
    (
        "Game Systems",
        "Implement core racing game logic and state management.",
        &[
            ("Lap counting", "Increment laps when the finish line is crossed with all checkpoints cleared."),
            ("Race timer", "Run the 3-2-1-GO countdown and record lap and best lap times."),
            ("Win/lose logic", "Finish the race after a set number of laps and show standings."),
        ],
    ),
    (
        "UI / HUD",
        "Build the heads-up display and menu interfaces.",
        &[
            ("Speedometer", "Overlay the current player speed from vehicle velocity."),
            ("Lap counter", "Show the current lap, total laps and best lap time."),
            ("Menus", "Provide start, pause and results screens."),
        ],
    ),
];

pub fn seed_tree() -> Tree {
    Tree {
        project: SEED_PROJECT_NAME.to_string(),
        main_request: SEED_MAIN_REQUEST.to_string(),
        prompts: SEED_PROMPTS
            .iter()
            .map(|(title, description, nodes)| TreePrompt {
                id: 0,
                title: title.to_string(),
                description: description.to_string(),
                nodes: nodes
                    .iter()
                    .map(|(name, action)| TreeNode {
                        id: 0,
                        name: name.to_string(),
                        action: action.to_string(),
                    })
                    .collect(),
            })
            .collect(),
    }
}

/// Imports the starter tree when the store has no prompts. Returns whether
/// anything was written.
pub fn seed_if_empty(db: &Database) -> AppResult<bool> {
    let existing = db.count_prompts()?;
    if existing > 0 {
        tracing::debug!(prompts = existing, "store already populated; skipping seed");
        return Ok(false);
    }
    let summary = import_tree(db, &seed_tree())?;
    tracing::info!(prompts = summary.prompts, nodes = summary.nodes, "seeded starter tree");
    Ok(true)
}
