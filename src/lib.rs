#[macro_use]
extern crate lazy_static;

#[macro_use]
extern crate log;

// Numerical and array abstract domains
pub mod domains {
    // Array abstractions over a numerical content domain
    pub mod array_expansion;
    pub mod array_smashing;
    // Cross-cutting operations every domain implements
    pub mod domain_traits;
    // Weighted graphs and the shortest-path machinery behind the octagon
    pub mod graph {
        pub mod graph_ops;
        pub mod weighted_graph;
    }
    pub mod interval;
    pub mod lattice;
    pub mod linear_constraint;
    // Operation codes shared by the transfer functions
    pub mod op;
    // Persistent integer-keyed map used by the offset maps
    pub mod patricia_tree;
    // The relational domain for ±x ± y <= c constraints
    pub mod split_octagon;
}

// Typed variables and the variable factory
pub mod variable;

// Domain policy knobs
pub mod option;
